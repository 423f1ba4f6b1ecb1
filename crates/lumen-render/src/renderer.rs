// SPDX-License-Identifier: CEPL-1.0
//! The begin/end frame state machine.
//!
//! ```text
//!   Idle --begin_frame()--> FrameStarted --end_frame()--> Idle
//!     ^                                                    |
//!     +---- begin_frame() == None (chain out of date) -----+
//! ```
//!
//! Calling a frame method in the wrong state is a caller bug and panics.
//! Presentation hiccups (out-of-date, suboptimal, window resized) are handled
//! here by rebuilding the chain; only fatal backend failures surface as `Err`.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::backend::FrameBackend;
use crate::status::PresentStatus;
use crate::{RenderSize, SurfaceSource, MAX_FRAMES_IN_FLIGHT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameState {
    Idle,
    FrameStarted { image_index: u32 },
}

pub struct FrameRenderer<B: FrameBackend> {
    backend: B,
    state: FrameState,
    frame_index: usize,
    clear_color: [f32; 4],
    // Set while the window is minimised; the chain is rebuilt once it has a size again.
    pending_recreate: bool,
}

impl<B: FrameBackend> FrameRenderer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: FrameState::Idle,
            frame_index: 0,
            clear_color: [0.01, 0.01, 0.01, 1.0],
            pending_recreate: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn is_frame_in_progress(&self) -> bool {
        matches!(self.state, FrameState::FrameStarted { .. })
    }

    /// Slot of the frame being recorded (or about to be), in `0..MAX_FRAMES_IN_FLIGHT`.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn extent(&self) -> RenderSize {
        self.backend.extent()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.backend.extent().aspect_ratio()
    }

    pub fn current_command_buffer(&self) -> B::CommandBuffer {
        assert!(
            self.is_frame_in_progress(),
            "cannot get command buffer when frame not in progress"
        );
        self.backend.command_buffer(self.frame_index)
    }

    /// Starts a frame. `None` means "skip drawing this iteration": the chain
    /// was out of date (and has been rebuilt) or the window has no area.
    pub fn begin_frame(
        &mut self,
        surface: &mut impl SurfaceSource,
    ) -> Result<Option<B::CommandBuffer>> {
        assert!(
            !self.is_frame_in_progress(),
            "can't call begin_frame while already in progress"
        );

        if self.pending_recreate && !self.recreate(surface)? {
            return Ok(None);
        }

        let (image_index, status) = self
            .backend
            .acquire_next_image(self.frame_index)
            .context("failed to acquire swap chain image")?;

        if status == PresentStatus::OutOfDate {
            debug!("acquire: chain out of date, rebuilding");
            self.recreate(surface)?;
            return Ok(None);
        }

        let cmd = self.backend.command_buffer(self.frame_index);
        self.backend
            .begin_commands(cmd)
            .context("failed to begin recording command buffer")?;
        self.state = FrameState::FrameStarted { image_index };
        Ok(Some(cmd))
    }

    /// Ends recording, submits and presents, then advances the frame slot.
    pub fn end_frame(&mut self, surface: &mut impl SurfaceSource) -> Result<()> {
        let image_index = match self.state {
            FrameState::FrameStarted { image_index } => image_index,
            FrameState::Idle => panic!("can't call end_frame while frame is not in progress"),
        };

        let cmd = self.backend.command_buffer(self.frame_index);
        self.backend
            .end_commands(cmd)
            .context("failed to record command buffer")?;
        let status = self
            .backend
            .submit(self.frame_index, cmd, image_index)
            .context("failed to present swap chain image")?;

        self.state = FrameState::Idle;
        self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;

        if status.needs_recreate() || surface.take_resized() {
            debug!("present: {status:?}, rebuilding chain");
            self.recreate(surface)?;
        }
        Ok(())
    }

    pub fn begin_swapchain_render_pass(&mut self, cmd: B::CommandBuffer) {
        let image_index = match self.state {
            FrameState::FrameStarted { image_index } => image_index,
            FrameState::Idle => {
                panic!("can't call begin_swapchain_render_pass if frame is not in progress")
            }
        };
        assert_eq!(
            cmd,
            self.backend.command_buffer(self.frame_index),
            "can't begin render pass on command buffer from a different frame"
        );
        self.backend
            .begin_render_pass(cmd, image_index, self.clear_color);
    }

    pub fn end_swapchain_render_pass(&mut self, cmd: B::CommandBuffer) {
        assert!(
            self.is_frame_in_progress(),
            "can't call end_swapchain_render_pass if frame is not in progress"
        );
        assert_eq!(
            cmd,
            self.backend.command_buffer(self.frame_index),
            "can't end render pass on command buffer from a different frame"
        );
        self.backend.end_render_pass(cmd);
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.backend.wait_idle()
    }

    /// Rebuilds the chain for the surface's current size. Returns `false`
    /// (and remembers to try again) while the surface has no area.
    fn recreate(&mut self, surface: &mut impl SurfaceSource) -> Result<bool> {
        // Any resize flag raised so far is answered by this rebuild.
        surface.take_resized();
        let size = surface.extent();
        if size.is_empty() {
            if !self.pending_recreate {
                info!("surface is {}x{}, deferring chain rebuild", size.width, size.height);
            }
            self.pending_recreate = true;
            return Ok(false);
        }

        self.backend
            .recreate_chain(size)
            .context("failed to recreate swap chain")?;
        self.pending_recreate = false;
        info!("swap chain rebuilt at {}x{}", size.width, size.height);
        Ok(true)
    }
}
