//! Low-level Vulkan object wrappers.
//!
//! Each type owns the handles it creates and releases them on drop or on an
//! explicit destroy call where frame-lifecycle ordering requires it. The
//! orchestration logic lives in [`crate::renderer`].

pub mod allocator;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use allocator::Allocator;
pub use device::{SurfaceProperties, VulkanDevice};
pub use instance::VulkanInstance;
pub use pipeline::{PipelineBundle, PipelineCache, PipelineConfig};
pub use surface::{SurfaceProvider, WindowSurfaceProvider};
pub use swapchain::{SwapchainImage, SwapchainWrapper};
pub use sync::FrameSync;
