use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use log::debug;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::vulkan::{Allocator, VulkanDevice};
use crate::Result;

use super::commands::SingleUseCommands;

/// Interleaved vertex layout shared by every mesh.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(12),
            vk::VertexInputAttributeDescription::default()
                .location(2)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(24),
        ]
    }
}

/// CPU-side mesh description handed in by the caller.
///
/// The crate does no model-file parsing; anything that can produce vertices
/// and indices can feed a [`SceneObject`].
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// A unit cube centered at the origin, one quad per face.
    pub fn cube() -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            // (normal, tangent u, tangent v) per face
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (face, (normal, u_axis, v_axis)) in faces.iter().enumerate() {
            let base = (face * 4) as u32;
            for &(u, v) in &[(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                let position = [
                    normal[0] * 0.5 + u_axis[0] * u + v_axis[0] * v,
                    normal[1] * 0.5 + u_axis[1] * u + v_axis[1] * v,
                    normal[2] * 0.5 + u_axis[2] * u + v_axis[2] * v,
                ];
                vertices.push(Vertex {
                    position,
                    normal: *normal,
                    uv: [u + 0.5, v + 0.5],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }

        Self { vertices, indices }
    }
}

/// View and projection matrices for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for CameraMatrices {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Per-object uniform block, written into a persistently mapped buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

/// The draw-unit seam: the command subsystem only indexes objects and calls
/// these two operations during parallel recording.
pub trait Drawable: Send + Sync {
    /// Write this object's uniform block for the current frame.
    fn update_uniform_buffers(&self, camera: &CameraMatrices);

    /// Record this object's draw into a secondary command buffer.
    fn record_draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        descriptor_set: vk::DescriptorSet,
    );

    /// The uniform buffer backing the object's descriptor set.
    fn uniform_buffer(&self) -> (vk::Buffer, vk::DeviceSize);
}

/// Optional debug-UI pass recorded into the primary buffer after the scene.
///
/// When installed, the scene renders into offscreen viewport images and the
/// overlay composites them (plus its own UI) into the swapchain image.
pub trait Overlay: Send {
    fn record(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        swapchain_view: vk::ImageView,
        viewport_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<()>;
}

/// A mesh instance owning its GPU buffers and transform.
pub struct SceneObject {
    id: Uuid,
    allocator: Arc<Allocator>,
    vertex_buffer: vk::Buffer,
    vertex_allocation: vk_mem::Allocation,
    index_buffer: vk::Buffer,
    index_allocation: vk_mem::Allocation,
    index_count: u32,
    uniform_buffer: vk::Buffer,
    uniform_allocation: vk_mem::Allocation,
    uniform_ptr: *mut ObjectUniform,
    transform: Mutex<Mat4>,
}

// The raw uniform pointer targets a persistently mapped allocation owned by
// this object. During recording exactly one worker thread touches a given
// object (object slices per thread are disjoint), so concurrent writes through
// the pointer cannot happen.
unsafe impl Send for SceneObject {}
unsafe impl Sync for SceneObject {}

impl SceneObject {
    /// Upload mesh data and allocate the object's uniform buffer.
    ///
    /// Vertex and index data go through a staging buffer and a single-use
    /// command batch on the transfer queue; this blocks until the copy
    /// completes and never runs on the frame hot path.
    pub fn new(
        vulkan_device: &VulkanDevice,
        allocator: Arc<Allocator>,
        mesh: &MeshData,
    ) -> Result<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let (vertex_buffer, vertex_allocation) = upload_through_staging(
            vulkan_device,
            &allocator,
            vertex_bytes,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let (index_buffer, index_allocation) = upload_through_staging(
            vulkan_device,
            &allocator,
            index_bytes,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let uniform_info = vk::BufferCreateInfo::default()
            .size(std::mem::size_of::<ObjectUniform>() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (uniform_buffer, uniform_allocation, mapped) =
            allocator.create_mapped_buffer(&uniform_info)?;

        let id = Uuid::new_v4();
        debug!(
            "Scene object {id} uploaded ({} vertices, {} indices)",
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(Self {
            id,
            allocator,
            vertex_buffer,
            vertex_allocation,
            index_buffer,
            index_allocation,
            index_count: mesh.indices.len() as u32,
            uniform_buffer,
            uniform_allocation,
            uniform_ptr: mapped.cast::<ObjectUniform>(),
            transform: Mutex::new(Mat4::IDENTITY),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_transform(&self, transform: Mat4) {
        *self.transform.lock() = transform;
    }

    pub fn transform(&self) -> Mat4 {
        *self.transform.lock()
    }
}

impl Drawable for SceneObject {
    fn update_uniform_buffers(&self, camera: &CameraMatrices) {
        let uniform = ObjectUniform {
            model: *self.transform.lock(),
            view: camera.view,
            projection: camera.projection,
        };
        unsafe {
            self.uniform_ptr.write(uniform);
        }
    }

    fn record_draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        descriptor_set: vk::DescriptorSet,
    ) {
        unsafe {
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }

    fn uniform_buffer(&self) -> (vk::Buffer, vk::DeviceSize) {
        (
            self.uniform_buffer,
            std::mem::size_of::<ObjectUniform>() as vk::DeviceSize,
        )
    }
}

impl Drop for SceneObject {
    fn drop(&mut self) {
        self.allocator
            .destroy_buffer(self.vertex_buffer, &mut self.vertex_allocation);
        self.allocator
            .destroy_buffer(self.index_buffer, &mut self.index_allocation);
        self.allocator
            .destroy_buffer(self.uniform_buffer, &mut self.uniform_allocation);
    }
}

/// Ordered collection of drawable objects.
///
/// Order is load order; the parallel recorder partitions this list into
/// contiguous per-thread slices, so indices stay stable between loads and
/// unloads.
#[derive(Default)]
pub struct Scene {
    objects: Vec<Arc<SceneObject>>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
        }
    }

    pub fn add(&mut self, object: SceneObject) -> Uuid {
        let id = object.id();
        self.objects.push(Arc::new(object));
        id
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Arc<SceneObject>> {
        let index = self.objects.iter().position(|object| object.id() == id)?;
        Some(self.objects.remove(index))
    }

    pub fn objects(&self) -> &[Arc<SceneObject>] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

fn upload_through_staging(
    vulkan_device: &VulkanDevice,
    allocator: &Allocator,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<(vk::Buffer, vk_mem::Allocation)> {
    let size = data.len() as vk::DeviceSize;

    let staging_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(vk::BufferUsageFlags::TRANSFER_SRC)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let (staging_buffer, mut staging_allocation, staging_ptr) =
        allocator.create_mapped_buffer(&staging_info)?;

    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), staging_ptr, data.len());
    }

    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage | vk::BufferUsageFlags::TRANSFER_DST)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let (buffer, allocation) =
        allocator.create_buffer(&buffer_info, vk_mem::MemoryUsage::AutoPreferDevice)?;

    let result = (|| {
        let mut commands = SingleUseCommands::new(
            Arc::clone(&vulkan_device.device),
            vulkan_device.transfer_queue_family,
            1,
        )?;

        let region = vk::BufferCopy::default().size(size);
        unsafe {
            vulkan_device.device.cmd_copy_buffer(
                commands.buffer(0),
                staging_buffer,
                buffer,
                &[region],
            );
        }

        commands.finish(vulkan_device.transfer_queue)
    })();

    allocator.destroy_buffer(staging_buffer, &mut staging_allocation);

    match result {
        Ok(()) => Ok((buffer, allocation)),
        Err(e) => {
            let mut allocation = allocation;
            allocator.destroy_buffer(buffer, &mut allocation);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_mesh_has_one_quad_per_face() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < 24));
    }

    #[test]
    fn cube_face_normals_are_unit_axes() {
        let cube = MeshData::cube();
        for vertex in &cube.vertices {
            let length_squared: f32 = vertex.normal.iter().map(|c| c * c).sum();
            assert!((length_squared - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn vertex_layout_matches_attribute_offsets() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
    }
}
