// SPDX-License-Identifier: CEPL-1.0
//! In-memory stand-ins for a GPU, its presentation chain and a window.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::Result;
use lumen_render::{
    check_chain_formats, BufferUsage, FrameBackend, ImageOwners, MemoryProperties,
    PresentStatus, RenderSize, SurfaceSource, TransferDevice, MAX_FRAMES_IN_FLIGHT,
};

pub const COLOR_FORMAT: u32 = 50; // B8G8R8A8_SRGB
pub const DEPTH_FORMAT: u32 = 126; // D32_SFLOAT

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Acquire {
        slot: usize,
        image: u32,
        status: PresentStatus,
    },
    Begin {
        slot: usize,
    },
    RenderPass {
        slot: usize,
        image: u32,
        viewport: RenderSize,
    },
    Submit {
        slot: usize,
        image: u32,
    },
    Recreate {
        extent: RenderSize,
    },
}

#[derive(Debug)]
pub struct FakeChain {
    pub extent: RenderSize,
    pub color_format: u32,
    pub depth_format: u32,
    pub images: Vec<u32>,
    pub image_views: Vec<u32>,
    pub depth_images: Vec<u32>,
    pub framebuffers: Vec<u32>,
}

impl FakeChain {
    fn build(extent: RenderSize, color_format: u32, depth_format: u32, count: usize) -> Self {
        let ids = |base: u32| (0..count as u32).map(|i| base + i).collect::<Vec<_>>();
        Self {
            extent,
            color_format,
            depth_format,
            images: ids(100),
            image_views: ids(200),
            depth_images: ids(300),
            framebuffers: ids(400),
        }
    }

    pub fn lengths_agree(&self) -> bool {
        let n = self.images.len();
        self.image_views.len() == n && self.depth_images.len() == n && self.framebuffers.len() == n
    }
}

/// Simulates one graphics queue that completes submissions in order, and
/// only when somebody waits on a fence.
pub struct FakeGpu {
    pub events: Vec<Event>,
    pub chain: FakeChain,
    /// What the presentation engine currently believes the surface size is.
    pub surface: RenderSize,
    /// Image count the next rebuild produces.
    pub next_image_count: usize,
    /// Color format the next rebuild picks.
    pub next_color_format: u32,
    pub suboptimal_next_present: bool,
    pub recreations: usize,
    /// Most submissions retired by a single fence wait.
    pub max_wait_backlog: usize,
    /// Most submissions queued on the GPU at once.
    pub max_in_flight: usize,

    fence_signaled: [bool; MAX_FRAMES_IN_FLIGHT],
    recording: [bool; MAX_FRAMES_IN_FLIGHT],
    gpu_queue: VecDeque<usize>,
    next_image: u32,
    owners: ImageOwners,
}

impl FakeGpu {
    pub fn new(extent: RenderSize) -> Self {
        let chain = FakeChain::build(extent, COLOR_FORMAT, DEPTH_FORMAT, 3);
        let owners = ImageOwners::new(chain.images.len());
        Self {
            events: Vec::new(),
            chain,
            surface: extent,
            next_image_count: 3,
            next_color_format: COLOR_FORMAT,
            suboptimal_next_present: false,
            recreations: 0,
            max_wait_backlog: 0,
            max_in_flight: 0,
            fence_signaled: [true; MAX_FRAMES_IN_FLIGHT],
            recording: [false; MAX_FRAMES_IN_FLIGHT],
            gpu_queue: VecDeque::new(),
            next_image: 0,
            owners,
        }
    }

    fn wait_fence(&mut self, slot: usize) {
        let mut retired = 0;
        while !self.fence_signaled[slot] {
            let done = self
                .gpu_queue
                .pop_front()
                .expect("waiting on a fence nothing will signal");
            self.fence_signaled[done] = true;
            retired += 1;
        }
        self.max_wait_backlog = self.max_wait_backlog.max(retired);
    }

    fn drain(&mut self) {
        while let Some(done) = self.gpu_queue.pop_front() {
            self.fence_signaled[done] = true;
        }
    }

    pub fn submitted_slots(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Submit { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect()
    }
}

impl FrameBackend for FakeGpu {
    type CommandBuffer = usize;

    fn acquire_next_image(&mut self, slot: usize) -> Result<(u32, PresentStatus)> {
        self.wait_fence(slot);
        if self.surface != self.chain.extent {
            self.events.push(Event::Acquire {
                slot,
                image: u32::MAX,
                status: PresentStatus::OutOfDate,
            });
            return Ok((u32::MAX, PresentStatus::OutOfDate));
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.chain.images.len() as u32;
        self.events.push(Event::Acquire {
            slot,
            image,
            status: PresentStatus::Success,
        });
        Ok((image, PresentStatus::Success))
    }

    fn command_buffer(&self, slot: usize) -> usize {
        slot
    }

    fn begin_commands(&mut self, cmd: usize) -> Result<()> {
        assert!(
            self.fence_signaled[cmd],
            "re-recording command buffer {cmd} while the GPU still executes it"
        );
        assert!(!self.recording[cmd]);
        self.recording[cmd] = true;
        self.events.push(Event::Begin { slot: cmd });
        Ok(())
    }

    fn end_commands(&mut self, cmd: usize) -> Result<()> {
        assert!(self.recording[cmd]);
        self.recording[cmd] = false;
        Ok(())
    }

    fn submit(&mut self, slot: usize, _cmd: usize, image_index: u32) -> Result<PresentStatus> {
        assert!((image_index as usize) < self.chain.images.len(), "submitting an invalid image");
        if let Some(prev) = self.owners.claim(image_index as usize, slot) {
            self.wait_fence(prev);
        }
        self.fence_signaled[slot] = false;
        self.gpu_queue.push_back(slot);
        self.max_in_flight = self.max_in_flight.max(self.gpu_queue.len());
        self.events.push(Event::Submit {
            slot,
            image: image_index,
        });

        if std::mem::take(&mut self.suboptimal_next_present) {
            return Ok(PresentStatus::Suboptimal);
        }
        if self.surface != self.chain.extent {
            return Ok(PresentStatus::OutOfDate);
        }
        Ok(PresentStatus::Success)
    }

    fn begin_render_pass(&mut self, cmd: usize, image_index: u32, _clear: [f32; 4]) {
        self.events.push(Event::RenderPass {
            slot: cmd,
            image: image_index,
            viewport: self.chain.extent,
        });
    }

    fn end_render_pass(&mut self, _cmd: usize) {}

    fn recreate_chain(&mut self, size: RenderSize) -> Result<()> {
        self.drain();
        let new = FakeChain::build(
            size,
            self.next_color_format,
            DEPTH_FORMAT,
            self.next_image_count,
        );
        check_chain_formats(
            self.chain.color_format,
            self.chain.depth_format,
            new.color_format,
            new.depth_format,
        )?;
        self.owners = ImageOwners::new(new.images.len());
        self.next_image = 0;
        self.chain = new;
        self.surface = size;
        self.recreations += 1;
        self.events.push(Event::Recreate { extent: size });
        Ok(())
    }

    fn extent(&self) -> RenderSize {
        self.chain.extent
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeWindow {
    pub size: RenderSize,
    pub resized: bool,
}

impl FakeWindow {
    pub fn new(size: RenderSize) -> Self {
        Self {
            size,
            resized: false,
        }
    }
}

impl SurfaceSource for FakeWindow {
    fn extent(&self) -> RenderSize {
        self.size
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransferEvent {
    Create {
        id: usize,
        usage: BufferUsage,
        memory: MemoryProperties,
    },
    HostWrite {
        id: usize,
    },
    Copy {
        src: usize,
        dst: usize,
        size: u64,
    },
    Drop {
        id: usize,
    },
}

pub struct FakeBuffer {
    pub id: usize,
    pub usage: BufferUsage,
    pub memory: MemoryProperties,
    pub data: RefCell<Vec<u8>>,
    log: Rc<RefCell<Vec<TransferEvent>>>,
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        self.log.borrow_mut().push(TransferEvent::Drop { id: self.id });
    }
}

#[derive(Default)]
pub struct FakeTransfer {
    pub log: Rc<RefCell<Vec<TransferEvent>>>,
    next_id: Cell<usize>,
}

impl TransferDevice for FakeTransfer {
    type Buffer = FakeBuffer;

    fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryProperties,
    ) -> Result<FakeBuffer> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.log.borrow_mut().push(TransferEvent::Create { id, usage, memory });
        Ok(FakeBuffer {
            id,
            usage,
            memory,
            // device memory starts as garbage
            data: RefCell::new(vec![0xCD; size as usize]),
            log: Rc::clone(&self.log),
        })
    }

    fn write_buffer(&self, buffer: &mut FakeBuffer, bytes: &[u8]) -> Result<()> {
        assert!(
            buffer.memory.contains(MemoryProperties::HOST_VISIBLE),
            "host write into memory it can't map"
        );
        buffer.data.borrow_mut()[..bytes.len()].copy_from_slice(bytes);
        self.log
            .borrow_mut()
            .push(TransferEvent::HostWrite { id: buffer.id });
        Ok(())
    }

    fn copy_buffer(&self, src: &FakeBuffer, dst: &FakeBuffer, size: u64) -> Result<()> {
        assert!(src.usage.contains(BufferUsage::TRANSFER_SRC));
        assert!(dst.usage.contains(BufferUsage::TRANSFER_DST));
        let n = size as usize;
        dst.data.borrow_mut()[..n].copy_from_slice(&src.data.borrow()[..n]);
        self.log.borrow_mut().push(TransferEvent::Copy {
            src: src.id,
            dst: dst.id,
            size,
        });
        Ok(())
    }
}
