// Vulkan Instance - process-wide entry point
//
// Responsibilities:
// - Loading the Vulkan library and creating the instance
// - Validation layer messages routed into `log`
// - Physical device enumeration
// - Surface creation and logical device contexts
//
// The instance must outlive every context created from it: destroy the
// contexts first, then call `Instance::destroy`.

use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};

use super::context::DeviceContext;
use super::device::{DevicePlan, PhysicalDevice, QueueFamily};
use super::vulkan::VulkanDriver;
use crate::error::{DeviceCreationError, GpuError, Result};

pub struct Instance {
    entry: Entry,
    raw: ash::Instance,
    api_version: u32,
    layers: BTreeSet<String>,
    extensions: BTreeSet<String>,
    surface_loader: ash::khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surfaces: Vec<vk::SurfaceKHR>,
    destroyed: bool,
}

fn cstr_to_string(raw: &[c_char]) -> String {
    // Vulkan name arrays are NUL terminated
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn to_cstrings(names: &BTreeSet<String>) -> Result<Vec<CString>> {
    names
        .iter()
        .map(|name| {
            CString::new(name.as_str())
                .map_err(|_| GpuError::InstanceCreation(format!("invalid name {:?}", name)))
        })
        .collect()
}

impl Instance {
    /// Create an instance targeting API `version` (major, minor, patch).
    ///
    /// Unavailable layers are skipped with a warning; an unavailable
    /// extension fails with `InstanceCreation`. When the validation layer is
    /// enabled and `VK_EXT_debug_utils` exists, its messages go to `log`.
    pub fn new(
        app_name: &str,
        version: [u32; 3],
        layers: &BTreeSet<String>,
        extensions: &BTreeSet<String>,
    ) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load()? };

        let available_layers: BTreeSet<String> =
            unsafe { entry.enumerate_instance_layer_properties()? }
                .iter()
                .map(|layer| cstr_to_string(&layer.layer_name))
                .collect();
        let available_extensions: BTreeSet<String> =
            unsafe { entry.enumerate_instance_extension_properties(None)? }
                .iter()
                .map(|ext| cstr_to_string(&ext.extension_name))
                .collect();

        let mut enabled_layers = BTreeSet::new();
        for layer in layers {
            if available_layers.contains(layer) {
                enabled_layers.insert(layer.clone());
            } else {
                log::warn!("Instance layer {} is not available, skipping", layer);
            }
        }

        if let Some(missing) = extensions.iter().find(|ext| !available_extensions.contains(*ext)) {
            return Err(GpuError::InstanceCreation(format!(
                "extension {} is not available",
                missing
            )));
        }
        let mut enabled_extensions = extensions.clone();
        let debug_utils_name = ash::ext::debug_utils::NAME.to_string_lossy().into_owned();
        let want_debug_utils = !enabled_layers.is_empty()
            && available_extensions.contains(&debug_utils_name);
        if want_debug_utils {
            enabled_extensions.insert(debug_utils_name);
        }

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| GpuError::InstanceCreation("invalid application name".to_string()))?;
        let api_version = vk::make_api_version(0, version[0], version[1], version[2]);
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"framechain")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        let layer_names = to_cstrings(&enabled_layers)?;
        let extension_names = to_cstrings(&enabled_extensions)?;
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> =
            extension_names.iter().map(|n| n.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| GpuError::InstanceCreation(e.to_string()))?;

        let debug_utils = if want_debug_utils {
            match Self::setup_debug_messenger(&entry, &raw) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    log::warn!("Failed to create debug messenger: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &raw);

        log::info!(
            "Instance created (API {}.{}.{}, {} layers, {} extensions)",
            version[0],
            version[1],
            version[2],
            enabled_layers.len(),
            enabled_extensions.len()
        );

        Ok(Self {
            entry,
            raw,
            api_version,
            layers: enabled_layers,
            extensions: enabled_extensions,
            surface_loader,
            debug_utils,
            surfaces: Vec::new(),
            destroyed: false,
        })
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> ash::prelude::VkResult<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        Ok((debug_utils, messenger))
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn layers(&self) -> &BTreeSet<String> {
        &self.layers
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    /// Snapshot every physical device the loader reports.
    pub fn enumerate_devices(&self) -> Result<Vec<PhysicalDevice>> {
        let devices = unsafe { self.raw.enumerate_physical_devices()? };

        devices
            .into_iter()
            .map(|raw| -> Result<PhysicalDevice> {
                let properties = unsafe { self.raw.get_physical_device_properties(raw) };
                let queue_families = unsafe {
                    self.raw.get_physical_device_queue_family_properties(raw)
                }
                .iter()
                .enumerate()
                .map(|(index, family)| QueueFamily {
                    index: index as u32,
                    flags: family.queue_flags,
                    count: family.queue_count,
                })
                .collect();
                let extensions = unsafe { self.raw.enumerate_device_extension_properties(raw)? }
                    .iter()
                    .map(|ext| cstr_to_string(&ext.extension_name))
                    .collect();
                #[allow(deprecated)]
                let layers = unsafe { self.raw.enumerate_device_layer_properties(raw)? }
                    .iter()
                    .map(|layer| cstr_to_string(&layer.layer_name))
                    .collect();

                Ok(PhysicalDevice {
                    raw,
                    name: cstr_to_string(&properties.device_name),
                    device_type: properties.device_type,
                    api_version: properties.api_version,
                    queue_families,
                    extensions,
                    layers,
                })
            })
            .collect()
    }

    /// Create a presentation surface for a native window. The surface is
    /// destroyed with the instance unless `destroy_surface` runs first.
    pub fn create_surface(
        &mut self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR> {
        let surface = unsafe {
            ash_window::create_surface(&self.entry, &self.raw, display, window, None)
                .map_err(GpuError::SurfaceCreation)?
        };
        self.surfaces.push(surface);
        Ok(surface)
    }

    pub fn destroy_surface(&mut self, surface: vk::SurfaceKHR) {
        if let Some(index) = self.surfaces.iter().position(|&s| s == surface) {
            self.surfaces.remove(index);
            unsafe { self.surface_loader.destroy_surface(surface, None) };
        }
    }

    /// Create a logical device on `device` with one queue per requested
    /// operation combination.
    pub fn create_context(
        &self,
        device: &PhysicalDevice,
        operations: &[vk::QueueFlags],
        layers: &BTreeSet<String>,
        extensions: &BTreeSet<String>,
    ) -> Result<DeviceContext> {
        let plan = DevicePlan::new(device, operations, layers, extensions)?;

        let queue_priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = plan
            .families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let layer_names = to_cstrings(&plan.layers)?;
        let extension_names = to_cstrings(&plan.extensions)?;
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> =
            extension_names.iter().map(|n| n.as_ptr()).collect();

        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let logical = unsafe { self.raw.create_device(device.raw, &create_info, None) }
            .map_err(DeviceCreationError::Vk)?;

        let driver = match VulkanDriver::new(
            &self.raw,
            self.surface_loader.clone(),
            device.raw,
            logical.clone(),
        ) {
            Ok(driver) => driver,
            Err(e) => {
                unsafe { logical.destroy_device(None) };
                return Err(GpuError::creation("allocator")(e));
            }
        };

        DeviceContext::from_plan(Box::new(driver), device, &plan)
    }

    /// Destroy remaining surfaces, the debug messenger and the instance.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        log::info!("Destroying Vulkan instance...");
        unsafe {
            for surface in self.surfaces.drain(..).rev() {
                self.surface_loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.teardown();
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message);
        }
        _ => {
            log::debug!("[Vulkan] {}", message);
        }
    }

    vk::FALSE
}
