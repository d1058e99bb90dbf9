//! embervk
//!
//! A real-time rendering core built directly on Vulkan through the `ash`
//! crate. The heart of the crate is the multi-threaded command recording and
//! frame submission pipeline: per-frame draw recording fans out across a
//! fixed worker pool into per-thread secondary command buffers, which are
//! merged into a single primary buffer and submitted against the graphics
//! queue. A repair-stage state machine drives swapchain and resource
//! recreation on resize, surface staleness, and acquire failures without
//! stalling the frame loop.
//!
//! Shader compilation, model-file parsing, and windowing event loops are out
//! of scope; callers hand in SPIR-V words, mesh data, and a
//! [`SurfaceProvider`] implementation.

pub mod error;
pub mod renderer;
pub mod vulkan;

pub use error::{EmberError, Result};
pub use renderer::{
    CameraMatrices, CommandOrchestrator, Drawable, FrameState, MeshData, Overlay, Renderer,
    RendererConfig, RepairStage, Scene, SceneObject, Vertex, WorkerPool,
};
pub use vulkan::{SurfaceProvider, WindowSurfaceProvider};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::error::{EmberError, Result};
    pub use crate::renderer::{
        CameraMatrices, MeshData, Renderer, RendererConfig, Scene, SceneObject, Vertex,
    };
    pub use crate::vulkan::{SurfaceProvider, WindowSurfaceProvider};
}
