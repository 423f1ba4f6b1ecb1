// SPDX-License-Identifier: CEPL-1.0
//! One `VkBuffer` plus its dedicated allocation.
//!
//! A buffer holds `instance_count` elements of `instance_size` bytes, each
//! starting on an `alignment_size` boundary (the instance size rounded up to
//! the requested minimum offset alignment). Host-visible buffers can be
//! mapped once and kept mapped for their whole life.
use std::ptr::NonNull;

use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{align_to, MemoryProperties};

use crate::device::Device;
use crate::handle::{Owned, RawDevice};

/// The currently mapped window `[offset, offset + len)` of the buffer.
#[derive(Clone, Copy, Debug)]
struct Mapping {
    ptr: NonNull<u8>,
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
}

/// Byte length of a `map(size, offset)` request on a buffer of `buffer_size`.
pub(crate) fn mapped_len(
    buffer_size: vk::DeviceSize,
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
) -> vk::DeviceSize {
    if size == vk::WHOLE_SIZE {
        buffer_size - offset
    } else {
        size
    }
}

/// Host-pointer offset for `len` bytes at buffer offset `offset`, given a
/// mapping that starts at `map_offset` and spans `map_len` bytes. `None` when
/// the write leaves the mapping.
pub(crate) fn mapped_write_offset(
    map_offset: vk::DeviceSize,
    map_len: vk::DeviceSize,
    offset: vk::DeviceSize,
    len: vk::DeviceSize,
) -> Option<usize> {
    let end = offset.checked_add(len)?;
    if offset < map_offset || end > map_offset + map_len {
        return None;
    }
    Some((offset - map_offset) as usize)
}

pub struct Buffer {
    mapped: Option<Mapping>,
    // destroyed before its memory is freed
    buffer: Owned<vk::Buffer>,
    memory: Owned<vk::DeviceMemory>,
    buffer_size: vk::DeviceSize,
    instance_size: vk::DeviceSize,
    instance_count: u32,
    alignment_size: vk::DeviceSize,
    memory_properties: MemoryProperties,
}

impl Buffer {
    pub fn new(
        device: &Device,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        memory_properties: MemoryProperties,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Self> {
        let alignment_size = align_to(instance_size, min_offset_alignment);
        let buffer_size = alignment_size * instance_count as vk::DeviceSize;
        let (buffer, memory) = unsafe { device.create_buffer(buffer_size, usage, memory_properties)? };
        Ok(Self {
            mapped: None,
            buffer,
            memory,
            buffer_size,
            instance_size,
            instance_count,
            alignment_size,
            memory_properties,
        })
    }

    fn device(&self) -> &RawDevice {
        self.buffer.device()
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer.raw()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Maps `size` bytes at `offset` (`vk::WHOLE_SIZE` for the rest of the
    /// buffer), replacing any earlier mapping.
    pub fn map(&mut self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        assert!(
            self.memory_properties.contains(MemoryProperties::HOST_VISIBLE),
            "mapping a buffer that is not host visible"
        );
        assert!(
            offset < self.buffer_size,
            "map offset {offset} past buffer of {}",
            self.buffer_size
        );
        let len = mapped_len(self.buffer_size, size, offset);
        assert!(
            offset + len <= self.buffer_size,
            "mapping {len} bytes at {offset} overruns buffer of {}",
            self.buffer_size
        );
        self.unmap();
        let ptr = unsafe {
            self.device()
                .raw
                .map_memory(self.memory.raw(), offset, size, vk::MemoryMapFlags::empty())
                .context("map_memory")?
        };
        self.mapped = NonNull::new(ptr.cast::<u8>()).map(|ptr| Mapping { ptr, offset, len });
        Ok(())
    }

    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.device().raw.unmap_memory(self.memory.raw()) };
        }
    }

    /// Copies `bytes` to buffer offset `offset`, which must lie in the mapped range.
    pub fn write_to_buffer(&mut self, bytes: &[u8], offset: vk::DeviceSize) {
        let Some(map) = self.mapped else {
            panic!("cannot copy to unmapped buffer");
        };
        let Some(at) = mapped_write_offset(map.offset, map.len, offset, bytes.len() as u64) else {
            panic!(
                "write of {} bytes at {offset} falls outside mapped range {}..{}",
                bytes.len(),
                map.offset,
                map.offset + map.len
            );
        };
        // SAFETY: `at..at + len` lies inside the live mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), map.ptr.as_ptr().add(at), bytes.len());
        }
    }

    /// Makes host writes visible to the device. Only needed for non-coherent memory.
    pub fn flush(&self, size: vk::DeviceSize, offset: vk::DeviceSize) -> Result<()> {
        let range = vk::MappedMemoryRange {
            s_type: vk::StructureType::MAPPED_MEMORY_RANGE,
            memory: self.memory.raw(),
            offset,
            size,
            ..Default::default()
        };
        unsafe {
            self.device()
                .raw
                .flush_mapped_memory_ranges(std::slice::from_ref(&range))
                .context("flush_mapped_memory_ranges")
        }
    }

    pub fn descriptor_info(
        &self,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
    ) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.raw(),
            offset,
            range: size,
        }
    }

    fn index_offset(&self, index: u32) -> vk::DeviceSize {
        assert!(
            index < self.instance_count,
            "instance {index} out of range ({} instances)",
            self.instance_count
        );
        index as vk::DeviceSize * self.alignment_size
    }

    /// Writes one instance; `bytes` must be at most `instance_size` long.
    pub fn write_to_index(&mut self, bytes: &[u8], index: u32) {
        assert!(bytes.len() as u64 <= self.instance_size);
        let offset = self.index_offset(index);
        self.write_to_buffer(bytes, offset);
    }

    pub fn flush_index(&self, index: u32) -> Result<()> {
        self.flush(self.alignment_size, self.index_offset(index))
    }

    pub fn descriptor_info_for_index(&self, index: u32) -> vk::DescriptorBufferInfo {
        self.descriptor_info(self.instance_size, self.index_offset(index))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_size_maps_rest_of_buffer() {
        assert_eq!(mapped_len(512, vk::WHOLE_SIZE, 0), 512);
        assert_eq!(mapped_len(512, vk::WHOLE_SIZE, 256), 256);
        assert_eq!(mapped_len(512, 64, 256), 64);
    }

    #[test]
    fn write_offset_is_relative_to_mapping_start() {
        // mapping covers 256..512
        assert_eq!(mapped_write_offset(256, 256, 256, 16), Some(0));
        assert_eq!(mapped_write_offset(256, 256, 300, 16), Some(44));
        assert_eq!(mapped_write_offset(256, 256, 496, 16), Some(240));
    }

    #[test]
    fn write_outside_mapping_is_refused() {
        assert_eq!(mapped_write_offset(256, 256, 0, 16), None);
        assert_eq!(mapped_write_offset(256, 256, 250, 16), None);
        assert_eq!(mapped_write_offset(256, 256, 500, 16), None);
        assert_eq!(mapped_write_offset(0, 64, u64::MAX, 2), None);
    }
}
