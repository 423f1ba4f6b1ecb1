// SPDX-License-Identifier: CEPL-1.0
use crate::error::RenderError;

/// Image layouts the engine knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
    DepthStencilAttachment,
    ColorAttachment,
    PresentSrc,
}

/// The closed set of one-shot layout transitions the device helper records.
///
/// Anything outside this set is a programming error, so [`classify`]
/// returns a fatal [`RenderError::UnsupportedLayoutTransition`] rather than
/// guessing barrier masks.
///
/// [`classify`]: LayoutTransition::classify
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutTransition {
    /// Fresh image about to receive a buffer copy.
    UndefinedToTransferDst,
    /// Fresh image about to be read by a transfer (e.g. blit source).
    UndefinedToTransferSrc,
    /// Uploaded image handed to fragment shaders.
    TransferDstToShaderRead,
    /// Fresh depth buffer.
    UndefinedToDepthAttachment,
}

impl LayoutTransition {
    pub const ALL: [LayoutTransition; 4] = [
        LayoutTransition::UndefinedToTransferDst,
        LayoutTransition::UndefinedToTransferSrc,
        LayoutTransition::TransferDstToShaderRead,
        LayoutTransition::UndefinedToDepthAttachment,
    ];

    pub fn classify(old: ImageLayout, new: ImageLayout) -> Result<Self, RenderError> {
        use ImageLayout as L;
        match (old, new) {
            (L::Undefined, L::TransferDst) => Ok(Self::UndefinedToTransferDst),
            (L::Undefined, L::TransferSrc) => Ok(Self::UndefinedToTransferSrc),
            (L::TransferDst, L::ShaderReadOnly) => Ok(Self::TransferDstToShaderRead),
            (L::Undefined, L::DepthStencilAttachment) => Ok(Self::UndefinedToDepthAttachment),
            _ => Err(RenderError::UnsupportedLayoutTransition { old, new }),
        }
    }

    pub fn layouts(self) -> (ImageLayout, ImageLayout) {
        use ImageLayout as L;
        match self {
            Self::UndefinedToTransferDst => (L::Undefined, L::TransferDst),
            Self::UndefinedToTransferSrc => (L::Undefined, L::TransferSrc),
            Self::TransferDstToShaderRead => (L::TransferDst, L::ShaderReadOnly),
            Self::UndefinedToDepthAttachment => (L::Undefined, L::DepthStencilAttachment),
        }
    }
}
