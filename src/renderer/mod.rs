//! Frame orchestration: state machine, worker pool, command recording, scene.

pub mod commands;
pub mod depth_buffer;
pub mod frame_state;
#[allow(clippy::module_inception)]
pub mod renderer;
pub mod scene;
pub mod worker_pool;

pub use commands::{CommandOrchestrator, FrameTargets, SingleUseCommands, ThreadCommandResources};
pub use depth_buffer::DepthBuffer;
pub use frame_state::{FrameState, RepairStage};
pub use renderer::{Renderer, RendererConfig};
pub use scene::{CameraMatrices, Drawable, MeshData, ObjectUniform, Overlay, Scene, SceneObject, Vertex};
pub use worker_pool::WorkerPool;
