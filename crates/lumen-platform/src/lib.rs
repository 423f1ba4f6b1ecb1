// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue: re-exports winit and tracks the window state the frame
//! renderer polls (drawable size, resize flag, occlusion).
pub use winit;

use lumen_render::{RenderSize, SurfaceSource};
use tracing::info;
use winit::dpi::PhysicalSize;

#[derive(Debug, Default)]
pub struct WindowState {
    size: RenderSize,
    resized: bool,
    occluded: bool,
}

impl WindowState {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            size: RenderSize::new(size.width, size.height),
            resized: false,
            occluded: false,
        }
    }

    /// Records a `WindowEvent::Resized`. The renderer picks the flag up at the
    /// end of the next frame.
    pub fn on_resized(&mut self, size: PhysicalSize<u32>) {
        let new = RenderSize::new(size.width, size.height);
        if new == self.size && !new.is_empty() {
            return;
        }
        let was_paused = self.is_paused();
        self.size = new;
        self.resized = true;
        if was_paused != self.is_paused() {
            info!(
                "Resized → {}x{} (paused={})",
                new.width,
                new.height,
                self.is_paused()
            );
        }
    }

    pub fn on_occluded(&mut self, occluded: bool) {
        if self.occluded != occluded {
            self.occluded = occluded;
            info!("Occluded={} → paused={}", occluded, self.is_paused());
        }
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    /// Nothing visible to draw into.
    pub fn is_paused(&self) -> bool {
        self.occluded || self.size.is_empty()
    }
}

impl SurfaceSource for WindowState {
    fn extent(&self) -> RenderSize {
        self.size
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}
