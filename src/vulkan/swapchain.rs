use std::sync::Arc;

use ash::{khr::swapchain, vk};
use log::{debug, info};

use crate::{EmberError, Result};

use super::allocator::Allocator;
use super::device::VulkanDevice;

/// One presentable swapchain image with its view.
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// Offscreen color target used when an overlay is installed.
///
/// The scene renders into these instead of the swapchain images; the overlay
/// pass samples them and composites into the swapchain image.
pub struct ViewportImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: vk_mem::Allocation,
}

/// Swapchain wrapper owning the handle, image views, and optional viewport
/// images.
pub struct SwapchainWrapper {
    device: Arc<ash::Device>,
    allocator: Arc<Allocator>,
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    pub images: Vec<SwapchainImage>,
    pub viewport_images: Vec<ViewportImage>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl SwapchainWrapper {
    /// Build a swapchain from the device's cached surface properties.
    pub fn new(
        vulkan_device: &VulkanDevice,
        allocator: Arc<Allocator>,
        with_viewport_images: bool,
    ) -> Result<Self> {
        Self::build(
            vulkan_device,
            allocator,
            with_viewport_images,
            vk::SwapchainKHR::null(),
        )
    }

    /// Rebuild against refreshed surface properties, retiring this swapchain.
    ///
    /// The old wrapper must stay alive until this call returns; dropping it
    /// afterwards releases the retired handle.
    pub fn recreate(&self, vulkan_device: &VulkanDevice) -> Result<Self> {
        Self::build(
            vulkan_device,
            Arc::clone(&self.allocator),
            !self.viewport_images.is_empty(),
            self.handle,
        )
    }

    fn build(
        vulkan_device: &VulkanDevice,
        allocator: Arc<Allocator>,
        with_viewport_images: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let properties = *vulkan_device.surface_properties();
        let capabilities = properties.capabilities;

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let queue_families = [
            vulkan_device.graphics_queue_family,
            vulkan_device.present_queue_family,
        ];
        let concurrent = queue_families[0] != queue_families[1];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(vulkan_device.instance.surface())
            .min_image_count(image_count)
            .image_format(properties.format.format)
            .image_color_space(properties.format.color_space)
            .image_extent(properties.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(properties.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if concurrent {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let device = Arc::clone(&vulkan_device.device);
        let loader = swapchain::Device::new(vulkan_device.instance.instance(), &device);

        unsafe {
            let handle = loader.create_swapchain(&create_info, None).map_err(|e| {
                EmberError::VulkanError(format!("Failed to create swapchain: {e:?}"))
            })?;

            let raw_images = loader.get_swapchain_images(handle).map_err(|e| {
                EmberError::VulkanError(format!("Failed to query swapchain images: {e:?}"))
            })?;

            let mut images = Vec::with_capacity(raw_images.len());
            for &image in &raw_images {
                let view = create_color_view(&device, image, properties.format.format)?;
                images.push(SwapchainImage { image, view });
            }

            let viewport_images = if with_viewport_images {
                Self::create_viewport_images(
                    &device,
                    &allocator,
                    properties.format.format,
                    properties.extent,
                    raw_images.len(),
                )?
            } else {
                Vec::new()
            };

            info!(
                "Swapchain created: {} images, {}x{}, {:?}",
                images.len(),
                properties.extent.width,
                properties.extent.height,
                properties.format.format
            );

            Ok(Self {
                device,
                allocator,
                loader,
                handle,
                images,
                viewport_images,
                format: properties.format.format,
                extent: properties.extent,
            })
        }
    }

    fn create_viewport_images(
        device: &Arc<ash::Device>,
        allocator: &Allocator,
        format: vk::Format,
        extent: vk::Extent2D,
        count: usize,
    ) -> Result<Vec<ViewportImage>> {
        let mut viewport_images = Vec::with_capacity(count);

        for _ in 0..count {
            let image_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let (image, allocation) =
                allocator.create_image(&image_info, vk_mem::MemoryUsage::AutoPreferDevice)?;
            let view = unsafe { create_color_view(device, image, format)? };

            viewport_images.push(ViewportImage {
                image,
                view,
                allocation,
            });
        }

        debug!("Created {count} viewport images for overlay rendering");
        Ok(viewport_images)
    }

    /// Acquire the next presentable image index.
    ///
    /// Out-of-date and suboptimal conditions surface as
    /// [`EmberError::SwapchainOutOfDate`]; the frame driver treats them as a
    /// repair trigger, not a failure.
    pub fn acquire_next_image(&self, image_available: vk::Semaphore) -> Result<u32> {
        unsafe {
            match self.loader.acquire_next_image(
                self.handle,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            ) {
                Ok((_, true)) => Err(EmberError::SwapchainOutOfDate(
                    "Swapchain is suboptimal".to_string(),
                )),
                Ok((index, false)) => Ok(index),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(EmberError::SwapchainOutOfDate(
                    "Swapchain is out of date".to_string(),
                )),
                Err(e) => Err(EmberError::VulkanError(format!(
                    "Failed to acquire swapchain image: {e:?}"
                ))),
            }
        }
    }

    /// Present the given image, waiting on `render_finished`.
    pub fn present(
        &self,
        present_queue: vk::Queue,
        image_index: u32,
        render_finished: vk::Semaphore,
    ) -> Result<()> {
        let wait_semaphores = [render_finished];
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            match self.loader.queue_present(present_queue, &present_info) {
                Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(
                    EmberError::SwapchainOutOfDate("Swapchain is out of date".to_string()),
                ),
                Ok(false) => Ok(()),
                Err(e) => Err(EmberError::VulkanError(format!(
                    "Failed to present swapchain image: {e:?}"
                ))),
            }
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for SwapchainWrapper {
    fn drop(&mut self) {
        unsafe {
            for image in &self.images {
                self.device.destroy_image_view(image.view, None);
            }
            for viewport in &mut self.viewport_images {
                self.device.destroy_image_view(viewport.view, None);
                self.allocator
                    .destroy_image(viewport.image, &mut viewport.allocation);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
        }
    }
}

unsafe fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    device
        .create_image_view(&view_info, None)
        .map_err(|e| EmberError::VulkanError(format!("Failed to create image view: {e:?}")))
}
