#![allow(unsafe_code)]

//! Driver instance ownership: validation layers, the debug message sink, adapter enumeration
//! and device creation.

use crate::rhi::vulkan::vulkan_conversions::map_vk_result;
use crate::rhi::vulkan::vulkan_device::{VulkanDevice, VulkanQueueFamilies};
use crate::rhi::{AdapterDesc, AdapterKind, GraphicsApi, InstanceCreateInfo, RhiError};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr;
use ash::vk;
use std::ffi::{CStr, CString};
use std::os::raw::c_void;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Forwards driver validation diagnostics to the process logger.
///
/// Severity maps Error -> `error!`, Warning -> `warn!`, Info -> `info!`; verbose chatter is
/// suppressed. `user_data` points at the instance's break-on-error flag: when set, an
/// error-severity message aborts the process so the offending call site is still on the
/// stack.
unsafe extern "system" fn debug_message_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {}", message);
        if !user_data.is_null() && *(user_data as *const bool) {
            std::process::abort();
        }
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan] {}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::info!("[vulkan] {}", message);
    }

    vk::FALSE
}

#[cfg(windows)]
fn platform_surface_extension() -> &'static CStr {
    khr::Win32Surface::name()
}

#[cfg(all(unix, not(target_os = "android")))]
fn platform_surface_extension() -> &'static CStr {
    khr::XlibSurface::name()
}

fn get_best_queue_family(
    queue_family_properties: &[vk::QueueFamilyProperties],
    requested: vk::QueueFlags,
) -> Option<u32> {
    // Fewer extra capability bits means a more dedicated family; a pure transfer queue
    // beats the do-everything graphics queue for transfer work.
    let mut best_index = None;
    let mut best_score = u32::MAX;
    for (index, family) in queue_family_properties.iter().enumerate() {
        if !family.queue_flags.contains(requested) {
            continue;
        }
        let score = family.queue_flags.as_raw() ^ requested.as_raw();
        if score < best_score {
            best_index = Some(index as u32);
            best_score = score;
        }
    }
    best_index
}

/// The driver instance, debug sink and adapter list.
///
/// Create one per process, enumerate adapters, create a [`VulkanDevice`]. Devices borrow the
/// instance's driver objects, so they must be dropped before the api is.
pub struct VulkanGraphicsApi {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    /// Heap-pinned so the messenger's user-data pointer stays valid for the instance's life.
    break_on_error: Box<bool>,
    physical_devices: Vec<vk::PhysicalDevice>,
}

impl VulkanGraphicsApi {
    /// Creates the driver instance. In debug builds the Khronos validation layer and the
    /// debug-utils messenger are enabled when the driver offers them.
    pub fn new(info: &InstanceCreateInfo) -> Result<VulkanGraphicsApi, RhiError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|error| {
            log::error!("Failed to load the vulkan loader: {}", error);
            RhiError::Unsupported {
                what: "a loadable vulkan runtime",
            }
        })?;

        let application_name = CString::new(info.application_name.as_str()).map_err(|_| {
            RhiError::InvalidArgument {
                reason: "application name contains a NUL byte",
            }
        })?;
        let engine_name = CString::new("borealis").expect("static string has no NUL");
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&application_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extension_names = vec![khr::Surface::name().as_ptr(), platform_surface_extension().as_ptr()];
        let mut layer_names = Vec::new();
        let validation_layer = CString::new(VALIDATION_LAYER).expect("static string has no NUL");
        if cfg!(debug_assertions) {
            extension_names.push(DebugUtils::name().as_ptr());

            let supported_layers =
                entry.enumerate_instance_layer_properties().map_err(map_vk_result)?;
            let validation_supported = supported_layers.iter().any(|layer| {
                unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }.to_string_lossy() == VALIDATION_LAYER
            });
            if validation_supported {
                layer_names.push(validation_layer.as_ptr());
            } else {
                log::warn!("{} is not installed; driver validation is off", VALIDATION_LAYER);
            }
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(map_vk_result)?;

        let break_on_error = Box::new(info.break_on_error && cfg!(debug_assertions));

        let (debug_utils, debug_messenger) = if cfg!(debug_assertions) {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_message_callback))
                .user_data(&*break_on_error as *const bool as *mut c_void);

            let messenger = unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) }
                .map_err(map_vk_result)?;
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(VulkanGraphicsApi {
            entry,
            instance,
            debug_utils,
            debug_messenger,
            break_on_error,
            physical_devices: Vec::new(),
        })
    }

    /// Whether error-severity validation messages abort the process. Always false in
    /// release builds.
    pub fn breaks_on_error(&self) -> bool {
        *self.break_on_error
    }

    fn ensure_physical_devices(&mut self) -> Result<(), RhiError> {
        if self.physical_devices.is_empty() {
            self.physical_devices =
                unsafe { self.instance.enumerate_physical_devices() }.map_err(map_vk_result)?;
        }
        Ok(())
    }

    fn adapter_kind(device_type: vk::PhysicalDeviceType) -> AdapterKind {
        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => AdapterKind::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterKind::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterKind::Virtual,
            vk::PhysicalDeviceType::CPU => AdapterKind::Cpu,
            _ => AdapterKind::Other,
        }
    }

    fn check_device_extensions(&self, physical_device: vk::PhysicalDevice) -> Result<(), RhiError> {
        let supported = unsafe { self.instance.enumerate_device_extension_properties(physical_device) }
            .map_err(map_vk_result)?;
        let is_supported = |wanted: &CStr| {
            supported
                .iter()
                .any(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) } == wanted)
        };

        if !is_supported(khr::Swapchain::name()) {
            return Err(RhiError::Unsupported {
                what: "the swapchain device extension",
            });
        }
        if !is_supported(khr::DynamicRendering::name()) {
            return Err(RhiError::Unsupported {
                what: "the dynamic rendering device extension",
            });
        }
        Ok(())
    }
}

impl GraphicsApi for VulkanGraphicsApi {
    type Device = VulkanDevice;

    fn enumerate_adapters(&mut self) -> Result<Vec<AdapterDesc>, RhiError> {
        self.ensure_physical_devices()?;

        Ok(self
            .physical_devices
            .iter()
            .enumerate()
            .map(|(index, &physical_device)| {
                let properties = unsafe { self.instance.get_physical_device_properties(physical_device) };
                let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned();
                AdapterDesc {
                    index: index as u32,
                    name,
                    kind: VulkanGraphicsApi::adapter_kind(properties.device_type),
                }
            })
            .collect())
    }

    fn create_device(&mut self, adapter_index: u32) -> Result<VulkanDevice, RhiError> {
        self.ensure_physical_devices()?;
        let physical_device = *self
            .physical_devices
            .get(adapter_index as usize)
            .ok_or(RhiError::InvalidArgument {
                reason: "adapter index out of range",
            })?;

        self.check_device_extensions(physical_device)?;

        let queue_family_properties =
            unsafe { self.instance.get_physical_device_queue_family_properties(physical_device) };

        let graphics = get_best_queue_family(&queue_family_properties, vk::QueueFlags::GRAPHICS).ok_or(
            RhiError::Unsupported {
                what: "a graphics-capable queue family",
            },
        )?;
        // Dedicated families are preferred; falling back to the graphics family is always
        // legal since graphics families carry transfer and compute implicitly.
        let transfer =
            get_best_queue_family(&queue_family_properties, vk::QueueFlags::TRANSFER).unwrap_or(graphics);
        let compute =
            get_best_queue_family(&queue_family_properties, vk::QueueFlags::COMPUTE).unwrap_or(graphics);

        let queue_families = VulkanQueueFamilies {
            graphics,
            compute,
            transfer,
        };
        let unique_families = queue_families.unique();
        log::debug!(
            "Queue families: graphics={} compute={} transfer={} ({} unique)",
            graphics,
            compute,
            transfer,
            unique_families.len()
        );

        let queue_priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extension_names = [khr::Swapchain::name().as_ptr(), khr::DynamicRendering::name().as_ptr()];
        let mut dynamic_rendering =
            vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(true);

        let device_info = vk::DeviceCreateInfo::builder()
            .push_next(&mut dynamic_rendering)
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names);

        let device = unsafe { self.instance.create_device(physical_device, &device_info, None) }
            .map_err(map_vk_result)?;

        VulkanDevice::new(
            self.entry.clone(),
            self.instance.clone(),
            physical_device,
            device,
            queue_families,
        )
    }
}

impl Drop for VulkanGraphicsApi {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
