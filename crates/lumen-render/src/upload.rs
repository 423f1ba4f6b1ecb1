// SPDX-License-Identifier: CEPL-1.0
//! Staging upload into device-local memory.
//!
//! 1. create a host-visible, coherent staging buffer sized to the payload
//! 2. map, copy, unmap
//! 3. create the device-local destination with `TRANSFER_DST`
//! 4. one buffer-to-buffer copy through a single-time command buffer
//! 5. drop the staging buffer
//!
//! The destination is never mapped, so the host can't race the device on it
//! and it is never observed half-written.

use anyhow::{ensure, Context, Result};

use crate::memory::{BufferUsage, MemoryProperties};

/// The few device operations the upload protocol needs.
pub trait TransferDevice {
    /// Dropping a buffer releases its allocation.
    type Buffer;

    fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryProperties,
    ) -> Result<Self::Buffer>;

    /// Maps `buffer`, copies `bytes` to offset 0 and unmaps it again.
    fn write_buffer(&self, buffer: &mut Self::Buffer, bytes: &[u8]) -> Result<()>;

    /// Records and submits one copy and blocks until the queue is idle.
    fn copy_buffer(&self, src: &Self::Buffer, dst: &Self::Buffer, size: u64) -> Result<()>;
}

/// Uploads `bytes` into a new device-local buffer with `usage`.
pub fn upload_device_local<D: TransferDevice>(
    device: &D,
    bytes: &[u8],
    usage: BufferUsage,
) -> Result<D::Buffer> {
    ensure!(!bytes.is_empty(), "refusing to upload an empty buffer");
    let size = bytes.len() as u64;

    let mut staging = device
        .create_buffer(size, BufferUsage::TRANSFER_SRC, MemoryProperties::STAGING)
        .context("staging buffer")?;
    device.write_buffer(&mut staging, bytes)?;

    let dst = device
        .create_buffer(
            size,
            usage | BufferUsage::TRANSFER_DST,
            MemoryProperties::DEVICE_LOCAL,
        )
        .context("device-local buffer")?;
    device.copy_buffer(&staging, &dst, size)?;

    drop(staging);
    Ok(dst)
}
