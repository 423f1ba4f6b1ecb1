// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame lifecycle: the frame-slot ring, the begin/end frame
//! state machine, per-frame descriptor pools and the staging upload protocol.
//!
//! A graphics backend plugs in through [`FrameBackend`] (presentation and
//! command recording) and [`TransferDevice`] (buffer uploads).
mod error;
mod status;

pub mod backend;
pub mod frame_info;
pub mod in_flight;
pub mod layout;
pub mod memory;
pub mod pools;
pub mod renderer;
pub mod upload;

pub use backend::{check_chain_formats, FrameBackend};
pub use error::RenderError;
pub use frame_info::FrameInfo;
pub use in_flight::ImageOwners;
pub use layout::{ImageLayout, LayoutTransition};
pub use memory::{align_to, BufferUsage, MemoryProperties};
pub use pools::{DescriptorAllocator, FramePools};
pub use renderer::FrameRenderer;
pub use status::PresentStatus;
pub use upload::{upload_device_local, TransferDevice};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero-sized drawable.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

/// What the renderer needs from the windowing layer.
pub trait SurfaceSource {
    /// Current drawable size in pixels.
    fn extent(&self) -> RenderSize;
    /// Returns the resize flag and clears it.
    fn take_resized(&mut self) -> bool;
}
