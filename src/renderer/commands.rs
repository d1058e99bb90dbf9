use std::sync::Arc;

use ash::vk;
use log::debug;
use parking_lot::Mutex;

use crate::error::{EmberError, Result};
use crate::vulkan::pipeline::format_has_stencil;
use crate::vulkan::{FrameSync, PipelineBundle};

use super::scene::{CameraMatrices, Drawable, Overlay};
use super::worker_pool::WorkerPool;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const CLEAR_DEPTH: f32 = 1.0;

/// Per-thread command pool and its secondary buffers.
///
/// Each worker thread records into buffers allocated from its own pool, so
/// no pool is ever touched from two threads at once.
pub struct ThreadCommandResources {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl ThreadCommandResources {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,
            pool: vk::CommandPool::null(),
            buffers: Vec::new(),
        }
    }

    pub fn buffers(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    /// Allocate `count` secondary buffers, creating the pool on first use.
    ///
    /// A zero count is a no-op: the pool is not created and no buffers
    /// exist afterwards.
    pub fn allocate(&mut self, queue_family: u32, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        if self.pool == vk::CommandPool::null() {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queue_family);
            self.pool = unsafe { self.device.create_command_pool(&pool_info, None) }
                .map_err(|e| EmberError::VulkanError(format!("Failed to create command pool: {e:?}")))?;
        }

        debug_assert!(self.buffers.is_empty());
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::SECONDARY)
            .command_buffer_count(count as u32);
        self.buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(|e| EmberError::VulkanError(format!("Failed to allocate command buffers: {e:?}")))?;
        Ok(())
    }

    /// Return the buffers to the pool. Safe to call when nothing is allocated.
    pub fn free(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.pool, &self.buffers);
        }
        self.buffers.clear();
    }

    /// Free the buffers and destroy the pool. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.pool == vk::CommandPool::null() {
            return;
        }
        self.free();
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
        self.pool = vk::CommandPool::null();
    }
}

impl Drop for ThreadCommandResources {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// The single primary buffer every frame is merged into.
struct PrimaryCommandBuffer {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl PrimaryCommandBuffer {
    fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,
            pool: vk::CommandPool::null(),
            buffer: vk::CommandBuffer::null(),
        }
    }

    fn allocate(&mut self, queue_family: u32) -> Result<()> {
        if self.pool == vk::CommandPool::null() {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(queue_family);
            self.pool = unsafe { self.device.create_command_pool(&pool_info, None) }
                .map_err(|e| EmberError::VulkanError(format!("Failed to create primary command pool: {e:?}")))?;
        }

        if self.buffer == vk::CommandBuffer::null() {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
                .map_err(|e| EmberError::VulkanError(format!("Failed to allocate primary command buffer: {e:?}")))?;
            self.buffer = buffers[0];
        }
        Ok(())
    }

    fn free(&mut self) {
        if self.buffer == vk::CommandBuffer::null() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.pool, &[self.buffer]);
        }
        self.buffer = vk::CommandBuffer::null();
    }

    fn destroy(&mut self) {
        if self.pool == vk::CommandPool::null() {
            return;
        }
        self.free();
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
        self.pool = vk::CommandPool::null();
    }
}

impl Drop for PrimaryCommandBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Attachment handles and formats for one frame.
pub struct FrameTargets {
    pub swapchain_image: vk::Image,
    pub swapchain_view: vk::ImageView,
    /// Offscreen scene target, present only when an overlay is installed.
    pub viewport: Option<(vk::Image, vk::ImageView)>,
    pub depth_image: vk::Image,
    pub depth_view: vk::ImageView,
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Everything a worker thread needs to record one secondary buffer.
///
/// Raw handles only, so the struct is `Copy` and moves into worker closures
/// without borrowing the orchestrator.
#[derive(Clone, Copy)]
struct SecondaryRecordEnv {
    color_format: vk::Format,
    depth_format: vk::Format,
    extent: vk::Extent2D,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

/// Owns the worker pool, per-thread command resources, and the primary
/// buffer; drives the allocate → record → submit → free cycle of each frame.
pub struct CommandOrchestrator {
    device: Arc<ash::Device>,
    pool: WorkerPool,
    objects_per_thread: usize,
    thread_resources: Vec<ThreadCommandResources>,
    primary: PrimaryCommandBuffer,
}

impl CommandOrchestrator {
    pub fn new(device: Arc<ash::Device>) -> Self {
        let threads = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_thread_count(device, threads)
    }

    pub fn with_thread_count(device: Arc<ash::Device>, threads: usize) -> Self {
        let pool = WorkerPool::new(threads);
        let thread_resources = (0..pool.thread_count())
            .map(|_| ThreadCommandResources::new(Arc::clone(&device)))
            .collect();
        let primary = PrimaryCommandBuffer::new(Arc::clone(&device));

        Self {
            device,
            pool,
            objects_per_thread: 0,
            thread_resources,
            primary,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    pub fn objects_per_thread(&self) -> usize {
        self.objects_per_thread
    }

    /// Size the per-thread secondary buffers for `total_objects` and make
    /// sure the primary buffer exists.
    ///
    /// Threads whose index is at or past the object count get no buffers:
    /// with fewer objects than threads each allocated thread records exactly
    /// one object, and the surplus threads sit the frame out.
    pub fn allocate_command_buffers(&mut self, queue_family: u32, total_objects: usize) -> Result<()> {
        self.objects_per_thread = objects_per_thread(total_objects, self.pool.thread_count());

        for (thread_index, resources) in self.thread_resources.iter_mut().enumerate() {
            if !thread_allocates(total_objects, thread_index) {
                break;
            }
            resources.allocate(queue_family, self.objects_per_thread)?;
        }

        self.primary.allocate(queue_family)?;

        debug!(
            "Command buffers allocated: {} objects, {} per thread",
            total_objects, self.objects_per_thread
        );
        Ok(())
    }

    /// Return every secondary buffer and the primary buffer to their pools.
    ///
    /// Pools are kept for reuse. Calling this twice, or before anything was
    /// allocated, does nothing.
    pub fn free_command_buffers(&mut self) {
        for resources in &mut self.thread_resources {
            resources.free();
        }
        self.primary.free();
    }

    /// Tear down all pools and buffers. Requires the device to be idle.
    pub fn release(&mut self) {
        for resources in &mut self.thread_resources {
            resources.destroy();
        }
        self.primary.destroy();
        self.objects_per_thread = 0;
        debug!("Command resources released");
    }

    /// Record the complete primary buffer for one frame.
    ///
    /// Layout transitions bracket a dynamic-rendering pass whose contents
    /// are the secondary buffers produced by [`record_scene_commands`]
    /// (executed as a single batch), followed by the optional overlay pass
    /// and the transition of the swapchain image to its present layout.
    ///
    /// [`record_scene_commands`]: Self::record_scene_commands
    pub fn record_command_buffers<D: Drawable + 'static>(
        &mut self,
        targets: &FrameTargets,
        pipeline: &PipelineBundle,
        objects: &[Arc<D>],
        camera: &CameraMatrices,
        mut overlay: Option<&mut (dyn Overlay + 'static)>,
    ) -> Result<()> {
        let primary = self.primary.buffer;
        debug_assert_ne!(primary, vk::CommandBuffer::null());

        let depth_aspect = depth_aspect_mask(targets.depth_format);

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(primary, &begin_info) }
            .map_err(|e| EmberError::RecordingFailed(format!("Failed to begin primary buffer: {e:?}")))?;

        move_image_layout(
            &self.device,
            primary,
            targets.swapchain_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::ATTACHMENT_OPTIMAL,
        );
        move_image_layout(
            &self.device,
            primary,
            targets.depth_image,
            depth_aspect,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::ATTACHMENT_OPTIMAL,
        );
        if let Some((viewport_image, _)) = targets.viewport {
            move_image_layout(
                &self.device,
                primary,
                viewport_image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::ATTACHMENT_OPTIMAL,
            );
        }

        // The scene renders into the offscreen viewport when an overlay will
        // composite it, and straight into the swapchain otherwise.
        let scene_view = targets
            .viewport
            .map(|(_, view)| view)
            .unwrap_or(targets.swapchain_view);

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(scene_view)
            .image_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            });
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(targets.depth_view)
            .image_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: CLEAR_DEPTH,
                    stencil: 0,
                },
            });

        let color_attachments = [color_attachment];
        let mut rendering_info = vk::RenderingInfo::default()
            .flags(vk::RenderingFlags::CONTENTS_SECONDARY_COMMAND_BUFFERS)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: targets.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);
        if format_has_stencil(targets.depth_format) {
            rendering_info = rendering_info.stencil_attachment(&depth_attachment);
        }

        unsafe {
            self.device.cmd_begin_rendering(primary, &rendering_info);
        }

        let env = SecondaryRecordEnv {
            color_format: targets.color_format,
            depth_format: targets.depth_format,
            extent: targets.extent,
            pipeline: pipeline.pipeline(),
            layout: pipeline.layout(),
        };
        let secondaries = self.record_scene_commands(env, pipeline, objects, camera)?;

        if !secondaries.is_empty() {
            unsafe {
                self.device.cmd_execute_commands(primary, &secondaries);
            }
        }

        unsafe {
            self.device.cmd_end_rendering(primary);
        }

        if let (Some(overlay), Some((viewport_image, viewport_view))) =
            (overlay.as_mut(), targets.viewport)
        {
            move_image_layout(
                &self.device,
                primary,
                viewport_image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::ATTACHMENT_OPTIMAL,
                vk::ImageLayout::READ_ONLY_OPTIMAL,
            );
            overlay.record(
                &self.device,
                primary,
                targets.swapchain_view,
                viewport_view,
                targets.extent,
            )?;
        }

        move_image_layout(
            &self.device,
            primary,
            targets.swapchain_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        unsafe { self.device.end_command_buffer(primary) }
            .map_err(|e| EmberError::RecordingFailed(format!("Failed to end primary buffer: {e:?}")))?;
        Ok(())
    }

    /// Fan per-object secondary recording out across the worker pool.
    ///
    /// Thread `t` owns the contiguous object range starting at
    /// `t * objects_per_thread`. Each task records one secondary buffer per
    /// object: inheritance info matching the primary pass, pipeline bind,
    /// viewport and scissor, uniform update, indexed draw. Blocks on the
    /// pool's completion barrier, then returns the buffers flattened in
    /// thread order so execution order matches object order.
    fn record_scene_commands<D: Drawable + 'static>(
        &self,
        env: SecondaryRecordEnv,
        pipeline: &PipelineBundle,
        objects: &[Arc<D>],
        camera: &CameraMatrices,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let total = objects.len();
        let per_thread = self.objects_per_thread;
        let descriptor_sets: Vec<vk::DescriptorSet> = (0..total)
            .map(|index| {
                pipeline.descriptor_set(index).ok_or_else(|| {
                    EmberError::RecordingFailed(format!("No descriptor set for object {index}"))
                })
            })
            .collect::<Result<_>>()?;

        let first_error: Arc<Mutex<Option<EmberError>>> = Arc::new(Mutex::new(None));

        for (thread_index, resources) in self.thread_resources.iter().enumerate() {
            if resources.buffers.is_empty() {
                continue;
            }

            let range = thread_slice(total, per_thread, thread_index);
            let device = Arc::clone(&self.device);
            let buffers = resources.buffers.clone();
            let slice: Vec<Arc<D>> = objects[range.clone()].iter().map(Arc::clone).collect();
            let sets = descriptor_sets[range].to_vec();
            let camera = *camera;
            let first_error = Arc::clone(&first_error);

            self.pool.execute(move || {
                if let Err(e) = record_thread_slice(&device, env, &buffers, &slice, &sets, &camera) {
                    let mut slot = first_error.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            });
        }

        self.pool.wait();

        if let Some(e) = first_error.lock().take() {
            return Err(e);
        }

        Ok(self
            .thread_resources
            .iter()
            .flat_map(|resources| resources.buffers.iter().copied())
            .collect())
    }

    /// Submit the primary buffer and block until the GPU signals the fence.
    ///
    /// Waits on image-available at color-attachment output, signals
    /// render-finished for presentation, then immediately waits out and
    /// resets the frame fence. One frame is ever in flight.
    pub fn submit_command_buffers(&self, queue: vk::Queue, sync: &FrameSync) -> Result<()> {
        let wait_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(sync.image_available)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(sync.render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let command_info = vk::CommandBufferSubmitInfo::default().command_buffer(self.primary.buffer);

        let wait_infos = [wait_info];
        let signal_infos = [signal_info];
        let command_infos = [command_info];
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_infos)
            .signal_semaphore_infos(&signal_infos);

        unsafe {
            self.device
                .queue_submit2(queue, &[submit_info], sync.in_flight)
        }
        .map_err(|e| EmberError::VulkanError(format!("Failed to submit frame: {e:?}")))?;

        sync.wait_and_reset_fence()
    }
}

impl Drop for CommandOrchestrator {
    fn drop(&mut self) {
        self.release();
    }
}

fn record_thread_slice<D: Drawable>(
    device: &ash::Device,
    env: SecondaryRecordEnv,
    buffers: &[vk::CommandBuffer],
    objects: &[Arc<D>],
    descriptor_sets: &[vk::DescriptorSet],
    camera: &CameraMatrices,
) -> Result<()> {
    debug_assert_eq!(buffers.len(), objects.len());
    debug_assert_eq!(buffers.len(), descriptor_sets.len());

    let color_formats = [env.color_format];
    let stencil_format = if format_has_stencil(env.depth_format) {
        env.depth_format
    } else {
        vk::Format::UNDEFINED
    };

    for ((cmd, object), set) in buffers.iter().zip(objects).zip(descriptor_sets) {
        let mut inheritance_rendering = vk::CommandBufferInheritanceRenderingInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(env.depth_format)
            .stencil_attachment_format(stencil_format)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let inheritance_info =
            vk::CommandBufferInheritanceInfo::default().push_next(&mut inheritance_rendering);
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(
                vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE
                    | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
            .inheritance_info(&inheritance_info);

        unsafe {
            device.begin_command_buffer(*cmd, &begin_info).map_err(|e| {
                EmberError::RecordingFailed(format!("Failed to begin secondary buffer: {e:?}"))
            })?;
            device.cmd_bind_pipeline(*cmd, vk::PipelineBindPoint::GRAPHICS, env.pipeline);
            set_viewport(device, *cmd, env.extent);
        }

        object.update_uniform_buffers(camera);
        object.record_draw(device, *cmd, env.layout, *set);

        unsafe {
            device.end_command_buffer(*cmd).map_err(|e| {
                EmberError::RecordingFailed(format!("Failed to end secondary buffer: {e:?}"))
            })?;
        }
    }
    Ok(())
}

fn set_viewport(device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[scissor]);
    }
}

/// Record a full-image layout transition with stage and access masks derived
/// from the two layouts.
fn move_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let is_depth = aspect_mask.contains(vk::ImageAspectFlags::DEPTH);

    let (src_stage, src_access) = match old_layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
        vk::ImageLayout::ATTACHMENT_OPTIMAL if is_depth => (
            vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        _ => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_WRITE,
        ),
    };

    let (dst_stage, dst_access) = match new_layout {
        vk::ImageLayout::ATTACHMENT_OPTIMAL if is_depth => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE)
        }
        _ => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
    };

    let barrier = vk::ImageMemoryBarrier2::default()
        .image(image)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let barriers = [barrier];
    let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dependency_info);
    }
}

fn depth_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if format_has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Slots each allocated thread records.
///
/// Zero when there are no objects; otherwise the even share, at least one,
/// and never more than the object count.
fn objects_per_thread(total_objects: usize, thread_count: usize) -> usize {
    if total_objects == 0 {
        0
    } else {
        (total_objects / thread_count).clamp(1, total_objects)
    }
}

/// Whether `thread_index` receives a buffer batch for `total_objects`.
fn thread_allocates(total_objects: usize, thread_index: usize) -> bool {
    !(total_objects > 0 && total_objects <= thread_index)
}

/// The contiguous object range owned by `thread_index`.
fn thread_slice(
    total_objects: usize,
    per_thread: usize,
    thread_index: usize,
) -> std::ops::Range<usize> {
    let start = thread_index * per_thread;
    start..(start + per_thread).min(total_objects)
}

/// One-shot primary buffers for setup work such as staging copies.
///
/// Allocated from a transient pool, begun on creation; [`finish`] ends them,
/// submits the whole batch without semaphores, waits for the queue to idle,
/// and tears everything down.
///
/// [`finish`]: Self::finish
pub struct SingleUseCommands {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl SingleUseCommands {
    pub fn new(device: Arc<ash::Device>, queue_family: u32, count: usize) -> Result<Self> {
        if count == 0 {
            return Ok(Self {
                device,
                pool: vk::CommandPool::null(),
                buffers: Vec::new(),
            });
        }

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| EmberError::VulkanError(format!("Failed to create transient pool: {e:?}")))?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let buffers = match unsafe { device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(EmberError::VulkanError(format!(
                    "Failed to allocate single-use buffers: {e:?}"
                )));
            }
        };

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        for buffer in &buffers {
            if let Err(e) = unsafe { device.begin_command_buffer(*buffer, &begin_info) } {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(EmberError::RecordingFailed(format!(
                    "Failed to begin single-use buffer: {e:?}"
                )));
            }
        }

        Ok(Self {
            device,
            pool,
            buffers,
        })
    }

    pub fn buffer(&self, index: usize) -> vk::CommandBuffer {
        self.buffers[index]
    }

    /// End every buffer, submit the batch, wait for the queue, and free
    /// everything. No-op when empty.
    pub fn finish(&mut self, queue: vk::Queue) -> Result<()> {
        if self.buffers.is_empty() {
            return Ok(());
        }

        let mut command_infos = Vec::with_capacity(self.buffers.len());
        for buffer in &self.buffers {
            unsafe { self.device.end_command_buffer(*buffer) }.map_err(|e| {
                EmberError::RecordingFailed(format!("Failed to end single-use buffer: {e:?}"))
            })?;
            command_infos.push(vk::CommandBufferSubmitInfo::default().command_buffer(*buffer));
        }

        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&command_infos);
        unsafe {
            self.device
                .queue_submit2(queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| EmberError::VulkanError(format!("Failed to submit single-use batch: {e:?}")))?;
        unsafe { self.device.queue_wait_idle(queue) }
            .map_err(|e| EmberError::VulkanError(format!("Queue wait failed: {e:?}")))?;

        self.cleanup();
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.pool == vk::CommandPool::null() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.pool, &self.buffers);
            self.device.destroy_command_pool(self.pool, None);
        }
        self.buffers.clear();
        self.pool = vk::CommandPool::null();
    }
}

impl Drop for SingleUseCommands {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_thread_share_is_the_even_split() {
        assert_eq!(objects_per_thread(100, 4), 25);
        assert_eq!(objects_per_thread(16, 8), 2);
    }

    #[test]
    fn per_thread_share_is_zero_only_for_an_empty_scene() {
        assert_eq!(objects_per_thread(0, 8), 0);
        assert_eq!(objects_per_thread(1, 8), 1);
    }

    #[test]
    fn per_thread_share_never_exceeds_the_object_count() {
        assert_eq!(objects_per_thread(2, 1), 2);
        assert_eq!(objects_per_thread(3, 1), 3);
        assert_eq!(objects_per_thread(3, 16), 1);
    }

    #[test]
    fn surplus_threads_get_no_buffers() {
        assert!(thread_allocates(2, 0));
        assert!(thread_allocates(2, 1));
        assert!(!thread_allocates(2, 2));
        assert!(!thread_allocates(2, 3));
    }

    #[test]
    fn empty_scene_allocates_nothing_everywhere() {
        // Every thread passes the gate but the per-thread count is zero
        for thread_index in 0..8 {
            assert!(thread_allocates(0, thread_index));
        }
        assert_eq!(objects_per_thread(0, 8), 0);
    }

    #[test]
    fn thread_ranges_are_contiguous_and_disjoint() {
        let total = 100;
        let threads = 4;
        let per_thread = objects_per_thread(total, threads);

        let mut next = 0;
        for thread_index in 0..threads {
            let range = thread_slice(total, per_thread, thread_index);
            assert_eq!(range.start, next);
            next = range.end;
        }
        assert_eq!(next, total);
    }

    #[test]
    fn uneven_split_leaves_the_tail_unassigned() {
        // 10 objects over 4 threads: 2 each, objects 8 and 9 get no slot
        let total = 10;
        let threads = 4;
        let per_thread = objects_per_thread(total, threads);
        assert_eq!(per_thread, 2);

        let covered: usize = (0..threads)
            .filter(|&t| thread_allocates(total, t))
            .map(|t| thread_slice(total, per_thread, t).len())
            .sum();
        assert_eq!(covered, 8);
    }

    #[test]
    fn fewer_objects_than_threads_uses_one_slot_each() {
        let total = 3;
        let threads = 8;
        let per_thread = objects_per_thread(total, threads);
        assert_eq!(per_thread, 1);

        let allocating: Vec<usize> = (0..threads).filter(|&t| thread_allocates(total, t)).collect();
        assert_eq!(allocating, vec![0, 1, 2]);

        for &t in &allocating {
            assert_eq!(thread_slice(total, per_thread, t), t..t + 1);
        }
    }
}
