// SPDX-License-Identifier: CEPL-1.0

/// Outcome of acquiring or presenting a chain image.
///
/// These are the recoverable presentation conditions; anything worse is an
/// `Err` from the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Success,
    /// The image is usable but the chain no longer matches the surface exactly.
    Suboptimal,
    /// The surface changed; the image index is invalid and the chain must be rebuilt.
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentStatus::Success)
    }
}
