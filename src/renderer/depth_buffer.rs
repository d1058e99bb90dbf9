use std::sync::Arc;

use ash::vk;
use log::debug;

use crate::error::{EmberError, Result};
use crate::vulkan::pipeline::format_has_stencil;
use crate::vulkan::{Allocator, VulkanDevice};

/// Depth (and, when the format carries one, stencil) attachment sized to the
/// swapchain. Rebuilt with the swapchain on every resize.
pub struct DepthBuffer {
    device: Arc<ash::Device>,
    allocator: Arc<Allocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl DepthBuffer {
    pub fn new(
        vulkan_device: &VulkanDevice,
        allocator: Arc<Allocator>,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let format = select_depth_format(vulkan_device)?;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (image, mut allocation) =
            allocator.create_image(&image_info, vk_mem::MemoryUsage::AutoPreferDevice)?;

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if format_has_stencil(format) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = match unsafe { vulkan_device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                allocator.destroy_image(image, &mut allocation);
                return Err(EmberError::VulkanError(format!(
                    "Failed to create depth image view: {e:?}"
                )));
            }
        };

        debug!("Depth buffer created ({format:?}, {}x{})", extent.width, extent.height);

        Ok(Self {
            device: Arc::clone(&vulkan_device.device),
            allocator,
            image,
            allocation,
            view,
            format,
            extent,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
        self.allocator.destroy_image(self.image, &mut self.allocation);
    }
}

/// Highest-precision depth format the device supports as an optimal-tiling
/// attachment, preferring stencil-capable formats.
fn select_depth_format(vulkan_device: &VulkanDevice) -> Result<vk::Format> {
    const CANDIDATES: [vk::Format; 3] = [
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT,
    ];

    for format in CANDIDATES {
        let properties = unsafe {
            vulkan_device
                .instance
                .instance()
                .get_physical_device_format_properties(vulkan_device.physical_device, format)
        };
        if properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(format);
        }
    }

    Err(EmberError::DeviceInitFailed(
        "No supported depth attachment format".into(),
    ))
}
