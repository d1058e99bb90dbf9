use std::sync::Arc;

use ash::vk;

use crate::{EmberError, Result};

/// Per-frame synchronization primitives.
///
/// The fence is created unsignaled: the frame driver submits, signals it, then
/// immediately waits and resets it. There is no frames-in-flight overlap in
/// this design, so a single set suffices.
pub struct FrameSync {
    device: Arc<ash::Device>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default();

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| EmberError::VulkanError(format!("Failed to create semaphore: {e:?}")))?;

            let render_finished = device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| EmberError::VulkanError(format!("Failed to create semaphore: {e:?}")))?;

            let in_flight = device
                .create_fence(&fence_info, None)
                .map_err(|e| EmberError::VulkanError(format!("Failed to create fence: {e:?}")))?;

            Ok(Self {
                device,
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

    /// Block until the in-flight fence signals, then reset it for reuse.
    pub fn wait_and_reset_fence(&self) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.in_flight], true, u64::MAX)
                .map_err(|e| EmberError::VulkanError(format!("Fence wait failed: {e:?}")))?;
            self.device
                .reset_fences(&[self.in_flight])
                .map_err(|e| EmberError::VulkanError(format!("Fence reset failed: {e:?}")))?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_fence(self.in_flight, None);
        }
    }
}
