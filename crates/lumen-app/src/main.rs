// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use lumen_core::{init_tracing, TextureCache};
use lumen_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use lumen_platform::WindowState;
use lumen_render_vk::VkConfig;
use tracing::{error, info};

mod config;
mod gpu;
mod render_system;

use config::{load_cfg, AppCfg};
use gpu::Gpu;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// Require the Khronos validation layer
    #[arg(long)]
    validation: bool,
    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,
}

struct App {
    cfg: AppCfg,
    vk_cfg: VkConfig,
    cache: TextureCache,
    max_frames: Option<u64>,

    // gpu before window: the surface must go before the window it was made for
    gpu: Option<Gpu>,
    window: Option<Window>,
    state: WindowState,

    frames: u64,
    fps_frames: u32,
    last_fps_instant: Instant,
    last_frame: Instant,
    failure: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            if let Err(e) = gpu.wait_idle() {
                error!("wait_idle on shutdown: {e:#}");
            }
        }
        self.gpu = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_paused() {
            return;
        }
        let Some(gpu) = &mut self.gpu else {
            return;
        };
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        match gpu.draw_frame(&mut self.state, dt) {
            Ok(true) => {
                self.frames += 1;
                self.fps_frames = self.fps_frames.saturating_add(1);
            }
            Ok(false) => {}
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        if self.max_frames.is_some_and(|n| self.frames >= n) {
            info!("rendered {} frames, exiting", self.frames);
            self.shutdown(event_loop);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => return self.fail(event_loop, e.into()),
        };
        self.state = WindowState::new(window.inner_size());

        match Gpu::new(&window, &self.cfg, &self.vk_cfg, &self.cache) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => return self.fail(event_loop, e),
        }
        self.window = Some(window);
        self.last_frame = Instant::now();
        info!("resumed → paused={}", self.state.is_paused());
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => self.state.on_resized(size),
            WindowEvent::Occluded(occluded) => self.state.on_occluded(occluded),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_paused() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.fps_frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.fps_frames);
            self.fps_frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(&args.config);
    let vk_cfg = VkConfig {
        app_name: cfg.window.title.clone(),
        validation: cfg.render.validation(args.validation),
        present_mode: cfg.render.present_mode.into(),
    };
    info!(
        "present mode = {:?}, validation = {:?}",
        vk_cfg.present_mode, vk_cfg.validation
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cache: TextureCache::new(&cfg.cache.texture_dir),
        cfg,
        vk_cfg,
        max_frames: args.frames,
        gpu: None,
        window: None,
        state: WindowState::default(),
        frames: 0,
        fps_frames: 0,
        last_fps_instant: Instant::now(),
        last_frame: Instant::now(),
        failure: None,
    };
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
