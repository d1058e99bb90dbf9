use std::sync::Arc;

use ash::{khr::swapchain, vk};
use log::{debug, info};

use crate::{EmberError, Result};

use super::instance::VulkanInstance;

/// Cached surface properties used to build the swapchain.
///
/// Refreshed through [`VulkanDevice::refresh_surface_properties`] whenever the
/// frame state machine marks them stale (resize, acquire failure).
#[derive(Clone, Copy)]
pub struct SurfaceProperties {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl SurfaceProperties {
    /// A zero-sized extent (minimized window) cannot back a swapchain.
    pub fn is_valid(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

/// Logical device wrapper owning queue handles and cached surface properties.
pub struct VulkanDevice {
    pub instance: Arc<VulkanInstance>,
    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
    pub graphics_queue_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue_family: u32,
    pub present_queue: vk::Queue,
    pub transfer_queue_family: u32,
    pub transfer_queue: vk::Queue,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    surface_properties: SurfaceProperties,
}

impl VulkanDevice {
    /// Pick a physical device, create the logical device, and cache initial
    /// surface properties.
    pub fn new(instance: Arc<VulkanInstance>) -> Result<Self> {
        unsafe {
            let physical_devices = instance
                .instance()
                .enumerate_physical_devices()
                .map_err(|e| {
                    EmberError::DeviceInitFailed(format!(
                        "Failed to enumerate physical devices: {e:?}"
                    ))
                })?;

            let mut best: Option<(vk::PhysicalDevice, u32, u32, i32)> = None;
            for &candidate in &physical_devices {
                let Some((graphics_family, present_family)) =
                    Self::find_queue_families(&instance, candidate)?
                else {
                    continue;
                };

                if !Self::supports_required_extensions(&instance, candidate)? {
                    continue;
                }

                let properties = instance.instance().get_physical_device_properties(candidate);
                let score = match properties.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                    _ => 0,
                };

                if best.map(|(_, _, _, s)| score > s).unwrap_or(true) {
                    best = Some((candidate, graphics_family, present_family, score));
                }
            }

            let (physical_device, graphics_queue_family, present_queue_family, _) =
                best.ok_or_else(|| {
                    EmberError::DeviceInitFailed("No suitable physical device found".to_string())
                })?;

            let device_properties = instance
                .instance()
                .get_physical_device_properties(physical_device);
            let device_name = device_properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| String::from("<unknown>"));
            info!("Selected physical device: {device_name}");

            let transfer_queue_family =
                Self::find_transfer_family(&instance, physical_device, graphics_queue_family);

            let mut unique_families = vec![graphics_queue_family];
            for family in [present_queue_family, transfer_queue_family] {
                if !unique_families.contains(&family) {
                    unique_families.push(family);
                }
            }

            let queue_priority = [1.0_f32];
            let queue_create_infos: Vec<_> = unique_families
                .iter()
                .map(|&family| {
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(family)
                        .queue_priorities(&queue_priority)
                })
                .collect();

            let device_extensions = [swapchain::NAME.as_ptr()];

            let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
                .dynamic_rendering(true)
                .synchronization2(true);

            let create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extensions)
                .push_next(&mut vulkan13_features);

            let device = instance
                .instance()
                .create_device(physical_device, &create_info, None)
                .map_err(|e| {
                    EmberError::DeviceInitFailed(format!("Failed to create logical device: {e:?}"))
                })?;
            let device = Arc::new(device);

            let graphics_queue = device.get_device_queue(graphics_queue_family, 0);
            let present_queue = device.get_device_queue(present_queue_family, 0);
            let transfer_queue = device.get_device_queue(transfer_queue_family, 0);

            let memory_properties = instance
                .instance()
                .get_physical_device_memory_properties(physical_device);

            let surface_properties =
                Self::query_surface_properties(&instance, physical_device, None)?;

            Ok(Self {
                instance,
                physical_device,
                device,
                graphics_queue_family,
                graphics_queue,
                present_queue_family,
                present_queue,
                transfer_queue_family,
                transfer_queue,
                memory_properties,
                surface_properties,
            })
        }
    }

    pub fn surface_properties(&self) -> &SurfaceProperties {
        &self.surface_properties
    }

    /// Re-query surface capabilities against the requested extent.
    ///
    /// Returns `false` (leaving the stale flag to be retried next frame) when
    /// the surface currently has a zero-sized extent.
    pub fn refresh_surface_properties(&mut self, requested: vk::Extent2D) -> Result<bool> {
        let refreshed =
            Self::query_surface_properties(&self.instance, self.physical_device, Some(requested))?;

        if !refreshed.is_valid() {
            debug!("Surface extent is zero, keeping previous surface properties");
            return Ok(false);
        }

        debug!(
            "Surface properties refreshed: {}x{} {:?} {:?}",
            refreshed.extent.width, refreshed.extent.height, refreshed.format.format,
            refreshed.present_mode
        );
        self.surface_properties = refreshed;
        Ok(true)
    }

    fn query_surface_properties(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        requested: Option<vk::Extent2D>,
    ) -> Result<SurfaceProperties> {
        unsafe {
            let surface = instance.surface();
            let loader = instance.surface_loader();

            let capabilities = loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(|e| {
                    EmberError::VulkanError(format!("Failed to query surface capabilities: {e:?}"))
                })?;

            let formats = loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(|e| {
                    EmberError::VulkanError(format!("Failed to query surface formats: {e:?}"))
                })?;

            let present_modes = loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(|e| {
                    EmberError::VulkanError(format!("Failed to query present modes: {e:?}"))
                })?;

            let format = formats
                .iter()
                .copied()
                .find(|f| {
                    f.format == vk::Format::B8G8R8A8_SRGB
                        && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                })
                .or_else(|| formats.first().copied())
                .ok_or_else(|| {
                    EmberError::VulkanError("Surface reports no formats".to_string())
                })?;

            let present_mode = if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
                vk::PresentModeKHR::MAILBOX
            } else {
                vk::PresentModeKHR::FIFO
            };

            // current_extent is u32::MAX when the surface lets us choose freely
            let extent = if capabilities.current_extent.width != u32::MAX {
                capabilities.current_extent
            } else {
                let requested = requested.unwrap_or(capabilities.min_image_extent);
                vk::Extent2D {
                    width: requested.width.clamp(
                        capabilities.min_image_extent.width,
                        capabilities.max_image_extent.width,
                    ),
                    height: requested.height.clamp(
                        capabilities.min_image_extent.height,
                        capabilities.max_image_extent.height,
                    ),
                }
            };

            Ok(SurfaceProperties {
                capabilities,
                format,
                present_mode,
                extent,
            })
        }
    }

    fn find_queue_families(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Option<(u32, u32)>> {
        unsafe {
            let families = instance
                .instance()
                .get_physical_device_queue_family_properties(physical_device);

            let mut graphics = None;
            let mut present = None;

            for (index, family) in families.iter().enumerate() {
                let index = index as u32;

                if graphics.is_none()
                    && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                {
                    graphics = Some(index);
                }

                let supports_present = instance
                    .surface_loader()
                    .get_physical_device_surface_support(physical_device, index, instance.surface())
                    .map_err(|e| {
                        EmberError::DeviceInitFailed(format!(
                            "Failed to query surface support: {e:?}"
                        ))
                    })?;
                if present.is_none() && supports_present {
                    present = Some(index);
                }
            }

            Ok(graphics.zip(present))
        }
    }

    fn find_transfer_family(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
    ) -> u32 {
        unsafe {
            let families = instance
                .instance()
                .get_physical_device_queue_family_properties(physical_device);

            // Prefer a dedicated transfer family, fall back to graphics
            families
                .iter()
                .enumerate()
                .find(|(index, family)| {
                    *index as u32 != graphics_family
                        && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                        && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                })
                .map(|(index, _)| index as u32)
                .unwrap_or(graphics_family)
        }
    }

    fn supports_required_extensions(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<bool> {
        unsafe {
            let available = instance
                .instance()
                .enumerate_device_extension_properties(physical_device)
                .map_err(|e| {
                    EmberError::DeviceInitFailed(format!(
                        "Failed to enumerate device extensions: {e:?}"
                    ))
                })?;

            let supported = available.iter().any(|ext| {
                ext.extension_name_as_c_str()
                    .map(|name| name == swapchain::NAME)
                    .unwrap_or(false)
            });

            Ok(supported)
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}
