// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Debug;

use anyhow::Result;

use crate::error::RenderError;
use crate::status::PresentStatus;
use crate::RenderSize;

/// Presentation and command recording, as seen by [`FrameRenderer`].
///
/// Slots are indices in `0..MAX_FRAMES_IN_FLIGHT`; the renderer owns the slot
/// counter and passes it down so the backend never keeps a second one.
///
/// [`FrameRenderer`]: crate::FrameRenderer
pub trait FrameBackend {
    type CommandBuffer: Copy + PartialEq + Debug;

    /// Blocks on `slot`'s completion fence, then requests the next chain image.
    ///
    /// On [`PresentStatus::OutOfDate`] the returned index is meaningless and
    /// must not be submitted.
    fn acquire_next_image(&mut self, slot: usize) -> Result<(u32, PresentStatus)>;

    /// The primary command buffer owned by `slot`.
    fn command_buffer(&self, slot: usize) -> Self::CommandBuffer;

    fn begin_commands(&mut self, cmd: Self::CommandBuffer) -> Result<()>;
    fn end_commands(&mut self, cmd: Self::CommandBuffer) -> Result<()>;

    /// Submits `cmd` for `image_index` and presents it.
    fn submit(
        &mut self,
        slot: usize,
        cmd: Self::CommandBuffer,
        image_index: u32,
    ) -> Result<PresentStatus>;

    /// Begins the chain render pass on `image_index` and sets viewport/scissor
    /// to the current extent.
    fn begin_render_pass(&mut self, cmd: Self::CommandBuffer, image_index: u32, clear: [f32; 4]);
    fn end_render_pass(&mut self, cmd: Self::CommandBuffer);

    /// Waits for the device to go idle and rebuilds the chain for `size`,
    /// keeping the old chain alive until the new one exists.
    fn recreate_chain(&mut self, size: RenderSize) -> Result<()>;

    fn extent(&self) -> RenderSize;

    fn wait_idle(&self) -> Result<()>;
}

/// A rebuilt chain must keep the formats of its predecessor; pipelines built
/// against the old render pass can't be salvaged otherwise.
pub fn check_chain_formats<F: PartialEq>(
    old_color: F,
    old_depth: F,
    new_color: F,
    new_depth: F,
) -> Result<(), RenderError> {
    if old_color != new_color {
        return Err(RenderError::SwapchainFormatChanged { which: "color" });
    }
    if old_depth != new_depth {
        return Err(RenderError::SwapchainFormatChanged { which: "depth" });
    }
    Ok(())
}
