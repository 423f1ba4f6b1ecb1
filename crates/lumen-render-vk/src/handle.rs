// SPDX-License-Identifier: CEPL-1.0
//! Owning wrappers around raw Vulkan handles.
//!
//! Every device-level object is an [`Owned<T>`]: it keeps an `Arc` to the
//! [`RawDevice`] it came from and destroys itself on drop. The raw device in
//! turn keeps the [`RawInstance`] (and with it the surface) alive, so
//! teardown order follows from reference counts rather than from field order
//! in whatever struct happens to hold the handles.
use std::sync::Arc;

use ash::{khr::swapchain, vk};
use tracing::debug;

use crate::instance::RawInstance;

pub struct RawDevice {
    pub raw: ash::Device,
    pub swapchain: swapchain::Device,
    // must outlive `raw`
    pub instance: Arc<RawInstance>,
}

impl Drop for RawDevice {
    fn drop(&mut self) {
        debug!("destroying device {:?}", self.raw.handle());
        // SAFETY: every child object holds an Arc to us, so none is left.
        unsafe { self.raw.destroy_device(None) };
    }
}

/// A handle that can be released through the device that created it.
pub trait DeviceObject: Copy {
    /// # Safety
    /// `self` was created from `device` and the GPU is done with it.
    unsafe fn destroy(self, device: &RawDevice);
}

macro_rules! device_objects {
    ($($ty:ty => $destroy:ident),* $(,)?) => {$(
        impl DeviceObject for $ty {
            unsafe fn destroy(self, device: &RawDevice) {
                device.raw.$destroy(self, None);
            }
        }
    )*};
}

device_objects! {
    vk::Buffer => destroy_buffer,
    vk::DeviceMemory => free_memory,
    vk::Image => destroy_image,
    vk::ImageView => destroy_image_view,
    vk::Sampler => destroy_sampler,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
    vk::CommandPool => destroy_command_pool,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::Pipeline => destroy_pipeline,
    vk::ShaderModule => destroy_shader_module,
}

impl DeviceObject for vk::SwapchainKHR {
    unsafe fn destroy(self, device: &RawDevice) {
        device.swapchain.destroy_swapchain(self, None);
    }
}

/// Sole owner of one Vulkan object. Not `Clone`; moving it moves ownership.
pub struct Owned<T: DeviceObject> {
    raw: T,
    device: Arc<RawDevice>,
}

impl<T: DeviceObject> Owned<T> {
    /// # Safety
    /// `raw` must have been created from `device` and must not be owned elsewhere.
    pub unsafe fn new(device: &Arc<RawDevice>, raw: T) -> Self {
        Self {
            raw,
            device: Arc::clone(device),
        }
    }

    pub fn raw(&self) -> T {
        self.raw
    }

    pub fn device(&self) -> &Arc<RawDevice> {
        &self.device
    }
}

impl<T: DeviceObject> Drop for Owned<T> {
    fn drop(&mut self) {
        // SAFETY: callers wait for the device (or the owning fence) before
        // letting GPU-visible objects go out of scope.
        unsafe { self.raw.destroy(&self.device) };
    }
}

impl<T: DeviceObject + std::fmt::Debug> std::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&self.raw).finish()
    }
}
