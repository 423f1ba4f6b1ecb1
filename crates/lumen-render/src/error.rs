// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

use crate::layout::ImageLayout;
use crate::memory::MemoryProperties;

/// Fatal setup and configuration errors. None of these are retried.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no suitable GPU: {0}")]
    NoSuitableDevice(String),
    #[error("required extension {0} is not available")]
    MissingExtension(String),
    #[error("validation layers requested, but not available")]
    ValidationLayersUnavailable,
    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition { old: ImageLayout, new: ImageLayout },
    #[error("no memory type in filter {type_bits:#x} has {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: MemoryProperties,
    },
    #[error("swap chain {which} format changed on recreation")]
    SwapchainFormatChanged { which: &'static str },
    #[error("descriptor pool exhausted")]
    PoolExhausted,
    #[error("{call} failed: {result}")]
    Api { call: &'static str, result: String },
}
