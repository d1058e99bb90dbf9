use thiserror::Error;

/// Errors surfaced by the renderer.
///
/// Driver-call failures are fatal to the operation that raised them; transient
/// presentation staleness is encoded in the frame state machine instead and
/// never reaches this type from the frame driver.
#[derive(Error, Debug)]
pub enum EmberError {
    #[error("Vulkan error: {0}")]
    VulkanError(String),

    #[error("Device initialization failed: {0}")]
    DeviceInitFailed(String),

    #[error("Swapchain out of date: {0}")]
    SwapchainOutOfDate(String),

    #[error("Allocation failed: {0}")]
    AllocationError(String),

    #[error("Command recording failed: {0}")]
    RecordingFailed(String),
}

pub type Result<T> = std::result::Result<T, EmberError>;
