// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;

bitflags! {
    /// How a buffer will be used; mapped 1:1 onto the backend's usage bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM      = 1 << 2;
        const STORAGE      = 1 << 3;
        const INDEX        = 1 << 4;
        const VERTEX       = 1 << 5;
    }
}

bitflags! {
    /// Required memory properties for an allocation.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL  = 1 << 0;
        const HOST_VISIBLE  = 1 << 1;
        const HOST_COHERENT = 1 << 2;
        const HOST_CACHED   = 1 << 3;
    }
}

impl MemoryProperties {
    /// Host-visible and coherent: staging buffers and per-frame uniforms.
    pub const STAGING: Self = Self::HOST_VISIBLE.union(Self::HOST_COHERENT);
}

/// Rounds `size` up to a multiple of `min_alignment`.
///
/// `min_alignment` comes from device limits and is a power of two; zero or
/// one means "no alignment requirement".
pub fn align_to(size: u64, min_alignment: u64) -> u64 {
    if min_alignment <= 1 {
        return size;
    }
    debug_assert!(min_alignment.is_power_of_two());
    (size + min_alignment - 1) & !(min_alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_power_of_two() {
        assert_eq!(align_to(64, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(0, 64), 0);
    }

    #[test]
    fn align_without_requirement_is_identity() {
        assert_eq!(align_to(13, 1), 13);
        assert_eq!(align_to(13, 0), 13);
    }

    #[test]
    fn staging_is_visible_and_coherent() {
        assert!(MemoryProperties::STAGING.contains(MemoryProperties::HOST_VISIBLE));
        assert!(MemoryProperties::STAGING.contains(MemoryProperties::HOST_COHERENT));
        assert!(!MemoryProperties::STAGING.contains(MemoryProperties::DEVICE_LOCAL));
    }
}
