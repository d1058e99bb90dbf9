use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EmberError, Result};
use crate::vulkan::{
    Allocator, FrameSync, PipelineBundle, PipelineCache, PipelineConfig, SurfaceProvider,
    SwapchainWrapper, VulkanDevice, VulkanInstance,
};

use super::commands::{CommandOrchestrator, FrameTargets};
use super::depth_buffer::DepthBuffer;
use super::frame_state::{FrameState, RepairStage};
use super::scene::{CameraMatrices, Drawable, MeshData, Overlay, Scene, SceneObject, Vertex};

/// Startup options. SPIR-V words for the scene pipeline come from the caller;
/// the crate does no shader compilation.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub vertex_spirv: Vec<u32>,
    pub fragment_spirv: Vec<u32>,
    pub enable_validation: bool,
    pub pipeline_cache_path: Option<PathBuf>,
    /// Worker thread count override; hardware concurrency when `None`.
    pub worker_threads: Option<usize>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vertex_spirv: Vec::new(),
            fragment_spirv: Vec::new(),
            enable_validation: cfg!(feature = "validation"),
            pipeline_cache_path: None,
            worker_threads: None,
        }
    }
}

/// Top-level frame driver.
///
/// Owns every Vulkan object and the frame state machine. Each
/// [`draw_frame`](Self::draw_frame) call first walks whatever repair stages
/// are pending (destruction, surface-property refresh, creation, pipeline
/// refresh), then acquires, records, submits, and presents one frame
/// synchronously.
pub struct Renderer {
    // Rebuilt by the repair chain - dropped before allocator and device
    frame_state: FrameState,
    scene: Scene,
    camera: CameraMatrices,
    overlay: Option<Box<dyn Overlay>>,
    orchestrator: CommandOrchestrator,
    pipeline_cache: PipelineCache,
    pipeline: Option<PipelineBundle>,
    depth_buffer: Option<DepthBuffer>,
    swapchain: Option<SwapchainWrapper>,
    frame_sync: Option<FrameSync>,
    config: RendererConfig,
    // IMPORTANT: these must be at the end so they drop LAST
    // Everything above holds buffers or pools from the allocator and device
    allocator: Arc<Allocator>,
    vulkan_device: VulkanDevice,
}

impl Renderer {
    pub fn new<S: SurfaceProvider>(surface_provider: &S, config: RendererConfig) -> Result<Self> {
        let instance = Arc::new(VulkanInstance::new(surface_provider, config.enable_validation)?);
        let vulkan_device = VulkanDevice::new(instance)?;
        let allocator = Arc::new(Allocator::new(&vulkan_device)?);

        let pipeline_cache = PipelineCache::new(
            Arc::clone(&vulkan_device.device),
            config.pipeline_cache_path.clone(),
        )?;

        let orchestrator = match config.worker_threads {
            Some(threads) => {
                CommandOrchestrator::with_thread_count(Arc::clone(&vulkan_device.device), threads)
            }
            None => CommandOrchestrator::new(Arc::clone(&vulkan_device.device)),
        };

        let mut frame_state = FrameState::new();
        frame_state.mark_initialized();
        // Nothing is built yet; the first draw_frame call walks the whole
        // repair chain and ends up with a complete set of frame resources.
        frame_state.request_destruction();

        info!(
            "Renderer initialized ({} worker threads)",
            orchestrator.thread_count()
        );

        Ok(Self {
            frame_state,
            scene: Scene::new(),
            camera: CameraMatrices::default(),
            overlay: None,
            orchestrator,
            pipeline_cache,
            pipeline: None,
            depth_buffer: None,
            swapchain: None,
            frame_sync: None,
            config,
            allocator,
            vulkan_device,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn camera(&self) -> &CameraMatrices {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: CameraMatrices) {
        self.camera = camera;
    }

    pub fn repair_stage(&self) -> RepairStage {
        self.frame_state.repair_stage()
    }

    /// Upload a mesh and register it as a scene object.
    ///
    /// Command resources and descriptor sets are sized per object, so the
    /// repair chain runs before the next frame draws.
    pub fn load_object(&mut self, mesh: &MeshData) -> Result<Uuid> {
        let object = SceneObject::new(&self.vulkan_device, Arc::clone(&self.allocator), mesh)?;
        let id = self.scene.add(object);
        self.frame_state.request_destruction();
        info!("Object {id} loaded ({} objects total)", self.scene.len());
        Ok(id)
    }

    /// Remove a scene object and free its GPU buffers.
    pub fn unload_object(&mut self, id: Uuid) -> Result<()> {
        self.wait_idle()?;
        match self.scene.remove(id) {
            Some(_) => {
                self.frame_state.request_destruction();
                info!("Object {id} unloaded ({} objects left)", self.scene.len());
            }
            None => warn!("Object {id} is not loaded, nothing to unload"),
        }
        Ok(())
    }

    /// Install a debug-UI pass. The swapchain gains offscreen viewport
    /// images for the scene on the next repair pass.
    pub fn install_overlay(&mut self, overlay: Box<dyn Overlay>) {
        self.overlay = Some(overlay);
        self.frame_state.request_destruction();
    }

    pub fn remove_overlay(&mut self) -> Option<Box<dyn Overlay>> {
        let overlay = self.overlay.take();
        if overlay.is_some() {
            self.frame_state.request_destruction();
        }
        overlay
    }

    /// Note a window resize. Resources are rebuilt lazily on the next frame.
    pub fn notify_resize(&mut self) {
        self.frame_state.mark_device_properties_stale();
        self.frame_state.request_destruction();
    }

    /// Walk pending repair stages, then draw one frame if possible.
    ///
    /// A frame that cannot be drawn (mid-repair, zero-sized surface, image
    /// not ready) returns `Ok(())`; only driver failures are errors.
    pub fn draw_frame<S: SurfaceProvider>(&mut self, surface_provider: &S) -> Result<()> {
        if !self.frame_state.is_initialized() {
            return Ok(());
        }

        if self.frame_state.repair_stage() == RepairStage::AwaitingDestruction {
            self.destroy_frame_resources()?;
        }

        if self.frame_state.device_properties_stale()
            && self
                .vulkan_device
                .refresh_surface_properties(surface_provider.extent())?
        {
            self.frame_state.clear_device_properties_stale();
        }

        if self.frame_state.repair_stage() == RepairStage::AwaitingCreation {
            self.create_frame_resources()?;
        }

        if self.frame_state.repair_stage() == RepairStage::AwaitingPipelineRefresh {
            self.refresh_pipeline()?;
        }

        if !self.frame_state.can_draw() {
            return Ok(());
        }

        let Some(image_index) = self.try_request_draw_image()? else {
            return Ok(());
        };

        self.orchestrator.allocate_command_buffers(
            self.vulkan_device.graphics_queue_family,
            self.scene.len(),
        )?;

        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| EmberError::VulkanError("Swapchain missing after repair".into()))?;
        let depth_buffer = self
            .depth_buffer
            .as_ref()
            .ok_or_else(|| EmberError::VulkanError("Depth buffer missing after repair".into()))?;
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| EmberError::VulkanError("Pipeline missing after repair".into()))?;
        let sync = self
            .frame_sync
            .as_ref()
            .ok_or_else(|| EmberError::VulkanError("Sync objects missing after repair".into()))?;

        let index = image_index as usize;
        let targets = FrameTargets {
            swapchain_image: swapchain.images[index].image,
            swapchain_view: swapchain.images[index].view,
            viewport: swapchain
                .viewport_images
                .get(index)
                .map(|viewport| (viewport.image, viewport.view)),
            depth_image: depth_buffer.image(),
            depth_view: depth_buffer.view(),
            color_format: swapchain.format,
            depth_format: depth_buffer.format(),
            extent: swapchain.extent,
        };

        self.orchestrator.record_command_buffers(
            &targets,
            pipeline,
            self.scene.objects(),
            &self.camera,
            self.overlay.as_deref_mut(),
        )?;

        self.orchestrator
            .submit_command_buffers(self.vulkan_device.graphics_queue, sync)?;

        match swapchain.present(
            self.vulkan_device.present_queue,
            image_index,
            sync.render_finished,
        ) {
            Ok(()) => {}
            Err(EmberError::SwapchainOutOfDate(_)) => {
                debug!("Swapchain out of date on present");
                self.frame_state.request_destruction();
            }
            Err(e) => return Err(e),
        }

        // The fence wait in submission already proved the GPU is done with
        // this frame's buffers
        self.orchestrator.free_command_buffers();
        Ok(())
    }

    /// Drop the initialized flag and release everything in dependency order.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.frame_state.is_initialized() {
            return Ok(());
        }
        self.frame_state.mark_shutdown();
        self.wait_idle()?;

        self.orchestrator.release();
        self.frame_sync = None;
        self.pipeline = None;
        self.depth_buffer = None;
        self.swapchain = None;
        self.scene.clear();
        self.overlay = None;

        info!("Renderer shut down");
        Ok(())
    }

    /// Acquire the next swapchain image, translating surface trouble into
    /// repair state instead of errors.
    fn try_request_draw_image(&mut self) -> Result<Option<u32>> {
        if !self.vulkan_device.surface_properties().is_valid() {
            self.frame_state.mark_device_properties_stale();
            self.frame_state.request_destruction();
            return Ok(None);
        }

        let (swapchain, sync) = match (&self.swapchain, &self.frame_sync) {
            (Some(swapchain), Some(sync)) => (swapchain, sync),
            _ => return Ok(None),
        };

        match swapchain.acquire_next_image(sync.image_available) {
            Ok(image_index) => Ok(Some(image_index)),
            Err(EmberError::SwapchainOutOfDate(_)) => {
                debug!("Swapchain out of date on acquire");
                self.frame_state.request_destruction();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Repair stage one: release sync objects, command buffers, and
    /// swapchain-dependent resources. The swapchain wrapper itself survives
    /// so recreation can chain from its handle.
    fn destroy_frame_resources(&mut self) -> Result<()> {
        self.wait_idle()?;

        self.frame_sync = None;
        self.orchestrator.free_command_buffers();
        self.pipeline = None;
        self.depth_buffer = None;

        self.frame_state.finish_destruction();
        debug!("Frame resources destroyed");
        Ok(())
    }

    /// Repair stage two: rebuild swapchain, depth buffer, and sync objects.
    fn create_frame_resources(&mut self) -> Result<()> {
        let want_viewport = self.overlay.is_some();

        let swapchain = match self.swapchain.take() {
            Some(old) if !old.viewport_images.is_empty() == want_viewport => {
                let rebuilt = old.recreate(&self.vulkan_device)?;
                drop(old);
                rebuilt
            }
            other => {
                // Overlay installed or removed since the last build; start a
                // fresh swapchain with the matching image set
                drop(other);
                SwapchainWrapper::new(
                    &self.vulkan_device,
                    Arc::clone(&self.allocator),
                    want_viewport,
                )?
            }
        };

        let depth_buffer = DepthBuffer::new(
            &self.vulkan_device,
            Arc::clone(&self.allocator),
            swapchain.extent,
        )?;
        let frame_sync = FrameSync::new(Arc::clone(&self.vulkan_device.device))?;

        self.swapchain = Some(swapchain);
        self.depth_buffer = Some(depth_buffer);
        self.frame_sync = Some(frame_sync);

        self.frame_state.finish_creation();
        debug!("Frame resources created");
        Ok(())
    }

    /// Repair stage three: rebuild the pipeline bundle and point each
    /// object's descriptor set at its uniform buffer.
    fn refresh_pipeline(&mut self) -> Result<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| EmberError::VulkanError("Pipeline refresh without a swapchain".into()))?;
        let depth_buffer = self.depth_buffer.as_ref().ok_or_else(|| {
            EmberError::VulkanError("Pipeline refresh without a depth buffer".into())
        })?;

        let vertex_attributes = Vertex::attribute_descriptions();
        let pipeline = PipelineBundle::new(
            Arc::clone(&self.vulkan_device.device),
            &self.pipeline_cache,
            PipelineConfig {
                vertex_spirv: &self.config.vertex_spirv,
                fragment_spirv: &self.config.fragment_spirv,
                color_format: swapchain.format,
                depth_format: depth_buffer.format(),
                vertex_binding: Vertex::binding_description(),
                vertex_attributes: &vertex_attributes,
                object_count: self.scene.len(),
            },
        )?;

        for (index, object) in self.scene.objects().iter().enumerate() {
            let (buffer, range) = object.uniform_buffer();
            pipeline.bind_object_uniform(index, buffer, range)?;
        }

        self.pipeline = Some(pipeline);
        self.frame_state.finish_pipeline_refresh();
        debug!("Pipeline refreshed for {} objects", self.scene.len());
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.vulkan_device.device.device_wait_idle() }
            .map_err(|e| EmberError::VulkanError(format!("Device wait idle failed: {e:?}")))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Fields drop in declaration order; make sure the GPU is quiet
        // before pools and buffers start going away
        if let Err(e) = self.wait_idle() {
            warn!("Device wait failed during renderer drop: {e}");
        }
    }
}
