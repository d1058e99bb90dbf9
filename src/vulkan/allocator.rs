use ash::vk;
use vk_mem::Alloc;

use crate::{EmberError, Result};

use super::device::VulkanDevice;

/// Thin wrapper over the VMA allocator.
///
/// All GPU memory for depth attachments, mesh buffers, and per-object uniform
/// buffers goes through this type. Must outlive every allocation it hands out;
/// the renderer keeps it in an `Arc` and drops it after all resources.
pub struct Allocator {
    inner: vk_mem::Allocator,
}

impl Allocator {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(
            device.instance.instance(),
            &device.device,
            device.physical_device,
        );

        let inner = unsafe {
            vk_mem::Allocator::new(create_info)
                .map_err(|e| EmberError::AllocationError(format!("Failed to create VMA: {e:?}")))?
        };

        Ok(Self { inner })
    }

    /// Allocate a device-local buffer.
    pub fn create_buffer(
        &self,
        buffer_info: &vk::BufferCreateInfo,
        usage: vk_mem::MemoryUsage,
    ) -> Result<(vk::Buffer, vk_mem::Allocation)> {
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage,
            ..Default::default()
        };

        unsafe {
            self.inner
                .create_buffer(buffer_info, &allocation_info)
                .map_err(|e| EmberError::AllocationError(format!("Buffer allocation failed: {e:?}")))
        }
    }

    /// Allocate a host-visible buffer, persistently mapped for its lifetime.
    ///
    /// Returns the mapped pointer alongside the handles; the mapping stays
    /// valid until the allocation is destroyed.
    pub fn create_mapped_buffer(
        &self,
        buffer_info: &vk::BufferCreateInfo,
    ) -> Result<(vk::Buffer, vk_mem::Allocation, *mut u8)> {
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::MAPPED
                | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };

        unsafe {
            let (buffer, allocation) = self
                .inner
                .create_buffer(buffer_info, &allocation_info)
                .map_err(|e| {
                    EmberError::AllocationError(format!("Mapped buffer allocation failed: {e:?}"))
                })?;

            let mapped = self.inner.get_allocation_info(&allocation).mapped_data as *mut u8;
            if mapped.is_null() {
                return Err(EmberError::AllocationError(
                    "VMA returned a null mapping for a persistently mapped buffer".to_string(),
                ));
            }

            Ok((buffer, allocation, mapped))
        }
    }

    /// Allocate a device-local image.
    pub fn create_image(
        &self,
        image_info: &vk::ImageCreateInfo,
        usage: vk_mem::MemoryUsage,
    ) -> Result<(vk::Image, vk_mem::Allocation)> {
        let allocation_info = vk_mem::AllocationCreateInfo {
            usage,
            ..Default::default()
        };

        unsafe {
            self.inner
                .create_image(image_info, &allocation_info)
                .map_err(|e| EmberError::AllocationError(format!("Image allocation failed: {e:?}")))
        }
    }

    pub fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut vk_mem::Allocation) {
        unsafe {
            self.inner.destroy_buffer(buffer, allocation);
        }
    }

    pub fn destroy_image(&self, image: vk::Image, allocation: &mut vk_mem::Allocation) {
        unsafe {
            self.inner.destroy_image(image, allocation);
        }
    }
}
