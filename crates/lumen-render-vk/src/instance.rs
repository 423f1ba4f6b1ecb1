// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and the validation messenger.
use std::ffi::{c_void, CStr, CString};

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use lumen_render::RenderError;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, trace, warn, Level};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Whether to load the Khronos validation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validation {
    Off,
    /// Enable when installed, carry on without it otherwise.
    IfAvailable,
    /// Enable, and fail instance creation when the layer is missing.
    Required,
}

impl Default for Validation {
    /// Debug builds try to validate; release builds don't.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Validation::IfAvailable
        } else {
            Validation::Off
        }
    }
}

pub struct RawInstance {
    pub raw: ash::Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    // keeps the loader library mapped; dropped last
    _entry: Entry,
}

impl Drop for RawInstance {
    // STRICT TEARDOWN ORDER: surface, messenger, instance. The device is
    // already gone because it holds an Arc to us.
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

/// Maps a validation message severity onto a tracing level.
pub(crate) fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        Level::ERROR
    } else if severity.contains(S::WARNING) {
        Level::WARN
    } else if severity.contains(S::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    let level = severity_level(severity);
    if level == Level::ERROR {
        error!("[vulkan {types:?}] {msg}");
    } else if level == Level::WARN {
        warn!("[vulkan {types:?}] {msg}");
    } else if level == Level::DEBUG {
        debug!("[vulkan {types:?}] {msg}");
    } else {
        trace!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

unsafe fn validation_layer_present(entry: &Entry) -> Result<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;
    Ok(layers
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER))
}

/// Creates the instance, the debug messenger (when validating) and the
/// window surface.
///
/// STRICT ORDER: instance, then the surface from THIS instance; devices are
/// later picked against this surface.
pub unsafe fn create_instance(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    app_name: &str,
    validation: Validation,
) -> Result<RawInstance> {
    let dh = display
        .display_handle()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .as_raw();

    let entry = Entry::load().context("failed to load the Vulkan loader")?;

    let validate = match validation {
        Validation::Off => false,
        Validation::IfAvailable => {
            let present = validation_layer_present(&entry)?;
            if !present {
                warn!("validation layer not installed; running without it");
            }
            present
        }
        Validation::Required => {
            if !validation_layer_present(&entry)? {
                return Err(RenderError::ValidationLayersUnavailable.into());
            }
            true
        }
    };

    let app = CString::new(app_name).context("application name contains NUL")?;
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: c"lumen".as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut ext_vec = ash_window::enumerate_required_extensions(dh)
        .context("enumerate_required_extensions")?
        .to_vec();
    if validate {
        ext_vec.push(debug_utils::NAME.as_ptr());
    }
    let available = entry
        .enumerate_instance_extension_properties(None)
        .context("enumerate_instance_extension_properties")?;
    for &name in &ext_vec {
        let name = CStr::from_ptr(name);
        if !available
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
        {
            return Err(RenderError::MissingExtension(name.to_string_lossy().into_owned()).into());
        }
    }
    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validate {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0, std::ptr::null())
    };

    // Chained so instance creation/destruction itself is also reported.
    let instance_messenger = messenger_info();
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next: if validate {
            (&instance_messenger as *const vk::DebugUtilsMessengerCreateInfoEXT).cast()
        } else {
            std::ptr::null()
        },
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;

    let debug = if validate {
        let loader = debug_utils::Instance::new(&entry, &instance);
        match loader.create_debug_utils_messenger(&messenger_info(), None) {
            Ok(m) => Some((loader, m)),
            Err(e) => {
                instance.destroy_instance(None);
                return Err(e).context("create_debug_utils_messenger");
            }
        }
    } else {
        None
    };

    let surface_loader = surface::Instance::new(&entry, &instance);
    let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
        Ok(s) => s,
        Err(e) => {
            if let Some((loader, m)) = &debug {
                loader.destroy_debug_utils_messenger(*m, None);
            }
            instance.destroy_instance(None);
            return Err(e).context("ash_window::create_surface");
        }
    };

    info!("Vulkan instance ready (validation={validate})");
    Ok(RawInstance {
        raw: instance,
        surface_loader,
        surface,
        debug,
        _entry: entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;

    #[test]
    fn severities_map_to_tracing_levels() {
        assert_eq!(severity_level(S::ERROR), Level::ERROR);
        assert_eq!(severity_level(S::WARNING), Level::WARN);
        assert_eq!(severity_level(S::INFO), Level::DEBUG);
        assert_eq!(severity_level(S::VERBOSE), Level::TRACE);
        assert_eq!(severity_level(S::WARNING | S::ERROR), Level::ERROR);
    }
}
