// SPDX-License-Identifier: CEPL-1.0
//! Sampled 2D textures uploaded through a staging buffer.
use anyhow::{ensure, Context, Result};
use ash::vk;
use lumen_core::{CompressedImage, TextureCache};
use lumen_render::{ImageLayout, MemoryProperties};
use thiserror::Error;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::device::Device;
use crate::handle::Owned;

/// Upper bound for sampler anisotropy regardless of what the device allows.
const MAX_ANISOTROPY: f32 = 16.0;

pub(crate) fn sampler_anisotropy(device_max: f32) -> f32 {
    device_max.clamp(1.0, MAX_ANISOTROPY)
}

/// RGBA of the 1x1 texture used when the real one can't be loaded.
pub const PLACEHOLDER_PIXEL: [u8; 4] = [255, 255, 255, 255];

const CACHED_FEATURES: vk::FormatFeatureFlags = vk::FormatFeatureFlags::from_raw(
    vk::FormatFeatureFlags::SAMPLED_IMAGE.as_raw() | vk::FormatFeatureFlags::TRANSFER_DST.as_raw(),
);

/// Byte length of a single-mip `width` x `height` image in `format`, or `None`
/// for formats a cache entry may not carry.
pub fn expected_texture_bytes(format: vk::Format, width: u32, height: u32) -> Option<u64> {
    use vk::Format as F;
    let (w, h) = (width as u64, height as u64);
    let texel = match format {
        F::R8_UNORM | F::R8_SRGB => 1,
        F::R8G8_UNORM | F::R8G8_SRGB => 2,
        F::R8G8B8A8_UNORM | F::R8G8B8A8_SRGB | F::B8G8R8A8_UNORM | F::B8G8R8A8_SRGB => 4,
        F::R16G16B16A16_SFLOAT => 8,
        F::R32G32B32A32_SFLOAT => 16,
        _ => {
            // block-compressed formats store 4x4 texel blocks
            let block = match format {
                F::BC1_RGB_UNORM_BLOCK
                | F::BC1_RGB_SRGB_BLOCK
                | F::BC1_RGBA_UNORM_BLOCK
                | F::BC1_RGBA_SRGB_BLOCK
                | F::BC4_UNORM_BLOCK
                | F::BC4_SNORM_BLOCK => 8,
                F::BC2_UNORM_BLOCK
                | F::BC2_SRGB_BLOCK
                | F::BC3_UNORM_BLOCK
                | F::BC3_SRGB_BLOCK
                | F::BC5_UNORM_BLOCK
                | F::BC5_SNORM_BLOCK
                | F::BC6H_UFLOAT_BLOCK
                | F::BC6H_SFLOAT_BLOCK
                | F::BC7_UNORM_BLOCK
                | F::BC7_SRGB_BLOCK => 16,
                _ => return None,
            };
            return Some(w.div_ceil(4) * h.div_ceil(4) * block);
        }
    };
    Some(w * h * texel)
}

/// Why a cache entry could not be used as a texture.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CachedTextureError {
    #[error("not in cache")]
    Missing,
    #[error("cached texture has no area ({width}x{height})")]
    Empty { width: i32, height: i32 },
    #[error("cached texture format {0} is not a known VkFormat")]
    UnknownFormat(i32),
    #[error("payload is {actual} bytes but {format:?} {width}x{height} needs {expected}")]
    SizeMismatch {
        format: vk::Format,
        width: u32,
        height: u32,
        expected: u64,
        actual: u64,
    },
    #[error("format {0:?} can't be sampled on this device")]
    UnsupportedFormat(vk::Format),
}

/// Checks that `image` describes an uploadable texture. `supported` answers
/// whether the device can sample and transfer into a format.
pub fn check_cached(
    image: &CompressedImage,
    supported: impl Fn(vk::Format) -> bool,
) -> Result<vk::Format, CachedTextureError> {
    if image.width <= 0 || image.height <= 0 {
        return Err(CachedTextureError::Empty {
            width: image.width,
            height: image.height,
        });
    }
    let (width, height) = (image.width as u32, image.height as u32);
    let format = vk::Format::from_raw(image.format);
    let expected = expected_texture_bytes(format, width, height)
        .ok_or(CachedTextureError::UnknownFormat(image.format))?;
    let actual = image.data.len() as u64;
    if actual != expected {
        return Err(CachedTextureError::SizeMismatch {
            format,
            width,
            height,
            expected,
            actual,
        });
    }
    if !supported(format) {
        return Err(CachedTextureError::UnsupportedFormat(format));
    }
    Ok(format)
}

/// Where a texture's pixels come from.
#[derive(Debug)]
pub enum TextureSource {
    Cached(CompressedImage, vk::Format),
    Placeholder(CachedTextureError),
}

/// Picks the cache entry when it checks out, the placeholder otherwise.
pub fn select_source(
    entry: Option<CompressedImage>,
    supported: impl Fn(vk::Format) -> bool,
) -> TextureSource {
    let Some(image) = entry else {
        return TextureSource::Placeholder(CachedTextureError::Missing);
    };
    match check_cached(&image, supported) {
        Ok(format) => TextureSource::Cached(image, format),
        Err(reason) => TextureSource::Placeholder(reason),
    }
}

fn device_supports(device: &Device) -> impl Fn(vk::Format) -> bool + '_ {
    move |format| unsafe {
        device
            .find_supported_format(&[format], vk::ImageTiling::OPTIMAL, CACHED_FEATURES)
            .is_ok()
    }
}

pub struct Texture {
    sampler: Owned<vk::Sampler>,
    view: Owned<vk::ImageView>,
    _image: Owned<vk::Image>,
    _memory: Owned<vk::DeviceMemory>,
}

impl Texture {
    /// Uploads tightly packed RGBA8 sRGB pixels.
    pub fn from_rgba8(device: &Device, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        ensure!(
            pixels.len() as u64 == width as u64 * height as u64 * 4,
            "{width}x{height} RGBA texture needs {} bytes, got {}",
            width as u64 * height as u64 * 4,
            pixels.len()
        );
        unsafe { Self::upload(device, width, height, vk::Format::R8G8B8A8_SRGB, pixels) }
    }

    /// Uploads a cache entry; `format` is interpreted as a raw `VkFormat`.
    pub fn from_cached(device: &Device, image: &CompressedImage) -> Result<Self> {
        let format = check_cached(image, device_supports(device))?;
        unsafe { Self::upload(device, image.width as u32, image.height as u32, format, &image.data) }
    }

    /// A 1x1 white texture, used whenever the real one can't be loaded.
    pub fn placeholder(device: &Device) -> Result<Self> {
        Self::from_rgba8(device, 1, 1, &PLACEHOLDER_PIXEL)
    }

    /// Loads `stem` from the cache, falling back to the placeholder when the
    /// entry is missing, corrupt or unusable on this device.
    pub fn load_or_placeholder(device: &Device, cache: &TextureCache, stem: &str) -> Result<Self> {
        match select_source(cache.fetch(stem), device_supports(device)) {
            TextureSource::Cached(image, format) => {
                let (w, h) = (image.width as u32, image.height as u32);
                match unsafe { Self::upload(device, w, h, format, &image.data) } {
                    Ok(t) => return Ok(t),
                    Err(e) => warn!("texture {stem}: {e:#}; using placeholder"),
                }
            }
            TextureSource::Placeholder(reason) => warn!("texture {stem}: {reason}; using placeholder"),
        }
        Self::placeholder(device)
    }

    unsafe fn upload(
        device: &Device,
        width: u32,
        height: u32,
        format: vk::Format,
        bytes: &[u8],
    ) -> Result<Self> {
        ensure!(!bytes.is_empty(), "refusing to upload an empty texture");
        let mut staging = Buffer::new(
            device,
            bytes.len() as u64,
            1,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryProperties::STAGING,
            1,
        )
        .context("texture staging buffer")?;
        staging.map(vk::WHOLE_SIZE, 0)?;
        staging.write_to_buffer(bytes, 0);
        staging.unmap();

        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let (image, memory) = device.create_image_with_info(&info, MemoryProperties::DEVICE_LOCAL)?;

        device.transition_image_layout(
            image.raw(),
            format,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
        )?;
        device.copy_buffer_to_image(staging.raw(), image.raw(), width, height, 1)?;
        device.transition_image_layout(
            image.raw(),
            format,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
        )?;
        drop(staging);

        let view = device.create_image_view(image.raw(), format, vk::ImageAspectFlags::COLOR)?;
        let sampler = create_sampler(device)?;
        debug!("texture uploaded: {width}x{height} {format:?}");

        Ok(Self {
            sampler,
            view,
            _image: image,
            _memory: memory,
        })
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler.raw(),
            image_view: self.view.raw(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

unsafe fn create_sampler(device: &Device) -> Result<Owned<vk::Sampler>> {
    let info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::TRUE,
        max_anisotropy: sampler_anisotropy(device.max_sampler_anisotropy()),
        compare_op: vk::CompareOp::ALWAYS,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        ..Default::default()
    };
    let sampler = device
        .raw()
        .create_sampler(&info, None)
        .context("create_sampler")?;
    Ok(Owned::new(device.shared(), sampler))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(width: i32, height: i32) -> CompressedImage {
        CompressedImage {
            width,
            height,
            format: vk::Format::R8G8B8A8_SRGB.as_raw(),
            data: vec![7; (width.max(0) * height.max(0) * 4) as usize],
        }
    }

    fn any_format(_: vk::Format) -> bool {
        true
    }

    fn reason(source: TextureSource) -> CachedTextureError {
        match source {
            TextureSource::Placeholder(reason) => reason,
            TextureSource::Cached(_, format) => panic!("expected placeholder, got {format:?}"),
        }
    }

    #[test]
    fn uncompressed_sizes_are_texel_count_times_texel_size() {
        assert_eq!(expected_texture_bytes(vk::Format::R8G8B8A8_SRGB, 64, 32), Some(64 * 32 * 4));
        assert_eq!(expected_texture_bytes(vk::Format::R8_UNORM, 3, 3), Some(9));
        assert_eq!(expected_texture_bytes(vk::Format::R32G32B32A32_SFLOAT, 2, 2), Some(64));
    }

    #[test]
    fn block_sizes_round_up_to_whole_blocks() {
        assert_eq!(expected_texture_bytes(vk::Format::BC1_RGBA_UNORM_BLOCK, 4, 4), Some(8));
        assert_eq!(expected_texture_bytes(vk::Format::BC1_RGBA_UNORM_BLOCK, 5, 4), Some(16));
        assert_eq!(expected_texture_bytes(vk::Format::BC7_SRGB_BLOCK, 1, 1), Some(16));
        assert_eq!(expected_texture_bytes(vk::Format::BC3_UNORM_BLOCK, 8, 6), Some(2 * 2 * 16));
    }

    #[test]
    fn unknown_formats_have_no_size() {
        assert_eq!(expected_texture_bytes(vk::Format::UNDEFINED, 4, 4), None);
        assert_eq!(expected_texture_bytes(vk::Format::from_raw(0x83F1), 4, 4), None);
    }

    #[test]
    fn well_formed_entry_is_used() {
        match select_source(Some(rgba(4, 2)), any_format) {
            TextureSource::Cached(image, format) => {
                assert_eq!(format, vk::Format::R8G8B8A8_SRGB);
                assert_eq!(image.data.len(), 32);
            }
            TextureSource::Placeholder(r) => panic!("fell back: {r}"),
        }
    }

    #[test]
    fn cache_miss_falls_back() {
        assert_eq!(reason(select_source(None, any_format)), CachedTextureError::Missing);
    }

    #[test]
    fn corrupt_cache_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TextureCache::new(dir.path());
        std::fs::write(cache.path_for("bricks"), b"definitely not a texture").unwrap();
        let source = select_source(cache.fetch("bricks"), any_format);
        assert_eq!(reason(source), CachedTextureError::Missing);
        assert!(!cache.path_for("bricks").exists());
    }

    #[test]
    fn stored_entry_round_trips_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TextureCache::new(dir.path());
        cache.store("bricks", &rgba(2, 2)).unwrap();
        assert!(matches!(
            select_source(cache.fetch("bricks"), any_format),
            TextureSource::Cached(_, vk::Format::R8G8B8A8_SRGB)
        ));
    }

    #[test]
    fn empty_extent_falls_back() {
        let mut image = rgba(4, 4);
        image.height = 0;
        assert_eq!(
            reason(select_source(Some(image), any_format)),
            CachedTextureError::Empty { width: 4, height: 0 }
        );
    }

    #[test]
    fn unknown_format_falls_back() {
        let mut image = rgba(4, 4);
        image.format = 0x83F1;
        assert_eq!(
            reason(select_source(Some(image), any_format)),
            CachedTextureError::UnknownFormat(0x83F1)
        );
    }

    #[test]
    fn short_payload_falls_back() {
        let mut image = rgba(4, 4);
        image.data.truncate(60);
        assert_eq!(
            reason(select_source(Some(image), any_format)),
            CachedTextureError::SizeMismatch {
                format: vk::Format::R8G8B8A8_SRGB,
                width: 4,
                height: 4,
                expected: 64,
                actual: 60,
            }
        );
    }

    #[test]
    fn oversized_payload_falls_back() {
        let mut image = rgba(2, 2);
        image.data.extend_from_slice(&[0; 4]);
        assert!(matches!(
            reason(select_source(Some(image), any_format)),
            CachedTextureError::SizeMismatch { expected: 16, actual: 20, .. }
        ));
    }

    #[test]
    fn format_the_device_rejects_falls_back() {
        let no_srgb = |f: vk::Format| f != vk::Format::R8G8B8A8_SRGB;
        assert_eq!(
            reason(select_source(Some(rgba(4, 4)), no_srgb)),
            CachedTextureError::UnsupportedFormat(vk::Format::R8G8B8A8_SRGB)
        );
    }

    #[test]
    fn device_support_is_checked_last() {
        // a malformed entry never reaches the device query
        let mut image = rgba(4, 4);
        image.data.clear();
        let source = select_source(Some(image), |_| panic!("device queried"));
        assert!(matches!(reason(source), CachedTextureError::SizeMismatch { .. }));
    }

    #[test]
    fn placeholder_is_opaque_white() {
        assert_eq!(PLACEHOLDER_PIXEL, [255; 4]);
    }

    #[test]
    fn anisotropy_is_limited_by_device_and_cap() {
        assert_eq!(sampler_anisotropy(8.0), 8.0);
        assert_eq!(sampler_anisotropy(64.0), 16.0);
        assert_eq!(sampler_anisotropy(0.0), 1.0);
    }
}
