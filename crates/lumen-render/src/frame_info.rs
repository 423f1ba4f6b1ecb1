// SPDX-License-Identifier: CEPL-1.0
use crate::backend::FrameBackend;
use crate::pools::DescriptorAllocator;

/// Everything a draw system needs for one frame.
///
/// Built fresh after `begin_frame` and dropped before `end_frame`; it borrows
/// and never owns.
pub struct FrameInfo<'a, B: FrameBackend, P: DescriptorAllocator, C> {
    pub frame_index: usize,
    /// Seconds since the previous frame.
    pub frame_time: f32,
    pub command_buffer: B::CommandBuffer,
    pub camera: &'a C,
    pub global_descriptor_set: P::Set,
    pub frame_pool: &'a P,
}
