use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use log::{debug, info, warn};

use crate::{EmberError, Result};

/// Pipeline cache with optional disk persistence.
///
/// Saves compiled pipeline state to disk for faster startup times.
pub struct PipelineCache {
    device: Arc<ash::Device>,
    cache: vk::PipelineCache,
    cache_file: Option<PathBuf>,
}

impl PipelineCache {
    /// Creates a pipeline cache with optional disk persistence.
    ///
    /// If `cache_file` is provided, the cache is loaded from disk on creation
    /// and saved back on drop.
    pub fn new(device: Arc<ash::Device>, cache_file: Option<PathBuf>) -> Result<Self> {
        let initial_data = cache_file
            .as_ref()
            .and_then(|path| {
                if path.exists() {
                    match std::fs::read(path) {
                        Ok(data) => {
                            info!("Loaded pipeline cache from: {}", path.display());
                            Some(data)
                        }
                        Err(e) => {
                            warn!("Failed to load pipeline cache: {e}");
                            None
                        }
                    }
                } else {
                    debug!("No existing pipeline cache at: {}", path.display());
                    None
                }
            })
            .unwrap_or_default();

        let create_info = if initial_data.is_empty() {
            vk::PipelineCacheCreateInfo::default()
        } else {
            vk::PipelineCacheCreateInfo::default().initial_data(&initial_data)
        };

        let cache = unsafe {
            device
                .create_pipeline_cache(&create_info, None)
                .map_err(|e| {
                    EmberError::VulkanError(format!("Failed to create pipeline cache: {e:?}"))
                })?
        };

        Ok(Self {
            device,
            cache,
            cache_file,
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Saves the cache to disk (if persistence is enabled).
    pub fn save(&self) -> Result<()> {
        if let Some(ref path) = self.cache_file {
            let data = unsafe {
                self.device.get_pipeline_cache_data(self.cache).map_err(|e| {
                    EmberError::VulkanError(format!("Failed to read pipeline cache data: {e:?}"))
                })?
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EmberError::VulkanError(format!("Failed to create cache directory: {e}"))
                })?;
            }
            std::fs::write(path, &data).map_err(|e| {
                EmberError::VulkanError(format!("Failed to write pipeline cache: {e}"))
            })?;
            info!(
                "Saved pipeline cache ({} bytes) to: {}",
                data.len(),
                path.display()
            );
        }
        Ok(())
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if self.cache_file.is_some() {
            if let Err(e) = self.save() {
                warn!("Failed to save pipeline cache on drop: {e}");
            }
        }
        unsafe {
            self.device.destroy_pipeline_cache(self.cache, None);
        }
    }
}

/// Everything the pipeline-refresh repair stage rebuilds, as one unit.
#[derive(Clone, Copy)]
pub struct PipelineConfig<'a> {
    pub vertex_spirv: &'a [u32],
    pub fragment_spirv: &'a [u32],
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub vertex_binding: vk::VertexInputBindingDescription,
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub object_count: usize,
}

/// Graphics pipeline, its layout, and the per-object descriptor sets.
///
/// Destroyed and rebuilt wholesale by the pipeline-refresh repair stage; the
/// descriptor pool is sized to the current object count, so object loads and
/// unloads force a rebuild.
pub struct PipelineBundle {
    device: Arc<ash::Device>,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl PipelineBundle {
    pub fn new(
        device: Arc<ash::Device>,
        cache: &PipelineCache,
        config: PipelineConfig<'_>,
    ) -> Result<Self> {
        unsafe {
            let descriptor_set_layout = Self::create_descriptor_set_layout(&device)?;
            let pipeline_layout = Self::create_pipeline_layout(&device, descriptor_set_layout)?;
            let pipeline =
                Self::create_graphics_pipeline(&device, cache.handle(), pipeline_layout, &config)?;
            let (descriptor_pool, descriptor_sets) =
                Self::create_descriptor_sets(&device, descriptor_set_layout, config.object_count)?;

            debug!(
                "Pipeline bundle created ({} descriptor sets)",
                descriptor_sets.len()
            );

            Ok(Self {
                device,
                descriptor_set_layout,
                pipeline_layout,
                pipeline,
                descriptor_pool,
                descriptor_sets,
            })
        }
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn descriptor_set(&self, object_index: usize) -> Option<vk::DescriptorSet> {
        self.descriptor_sets.get(object_index).copied()
    }

    /// Point the object's descriptor set at its uniform buffer.
    pub fn bind_object_uniform(
        &self,
        object_index: usize,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Result<()> {
        let set = self.descriptor_set(object_index).ok_or_else(|| {
            EmberError::VulkanError("Object descriptor set index out of bounds".into())
        })?;

        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range)];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);

        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }

    unsafe fn create_descriptor_set_layout(
        device: &ash::Device,
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)];

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        device
            .create_descriptor_set_layout(&create_info, None)
            .map_err(|e| {
                EmberError::VulkanError(format!("Failed to create descriptor set layout: {e:?}"))
            })
    }

    unsafe fn create_pipeline_layout(
        device: &ash::Device,
        descriptor_set_layout: vk::DescriptorSetLayout,
    ) -> Result<vk::PipelineLayout> {
        let set_layouts = [descriptor_set_layout];
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);

        device
            .create_pipeline_layout(&create_info, None)
            .map_err(|e| EmberError::VulkanError(format!("Failed to create pipeline layout: {e:?}")))
    }

    unsafe fn create_graphics_pipeline(
        device: &ash::Device,
        cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        config: &PipelineConfig<'_>,
    ) -> Result<vk::Pipeline> {
        let vertex_module = create_shader_module(device, config.vertex_spirv)?;
        let fragment_module = create_shader_module(device, config.fragment_spirv)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(c"main"),
        ];

        let vertex_bindings = [config.vertex_binding];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(config.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        // Viewport and scissor are dynamic; counts still need to be declared
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [config.color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(config.depth_format);
        if format_has_stencil(config.depth_format) {
            rendering_info = rendering_info.stencil_attachment_format(config.depth_format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let result = device.create_graphics_pipelines(cache, &[create_info], None);

        device.destroy_shader_module(vertex_module, None);
        device.destroy_shader_module(fragment_module, None);

        match result {
            Ok(pipelines) => Ok(pipelines[0]),
            Err((_, e)) => Err(EmberError::VulkanError(format!(
                "Failed to create graphics pipeline: {e:?}"
            ))),
        }
    }

    unsafe fn create_descriptor_sets(
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        object_count: usize,
    ) -> Result<(vk::DescriptorPool, Vec<vk::DescriptorSet>)> {
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(object_count.max(1) as u32)];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(object_count.max(1) as u32)
            .pool_sizes(&pool_sizes);

        let pool = device.create_descriptor_pool(&pool_info, None).map_err(|e| {
            EmberError::VulkanError(format!("Failed to create descriptor pool: {e:?}"))
        })?;

        let sets = if object_count > 0 {
            let layouts = vec![layout; object_count];
            let allocate_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);

            device.allocate_descriptor_sets(&allocate_info).map_err(|e| {
                EmberError::VulkanError(format!("Failed to allocate descriptor sets: {e:?}"))
            })?
        } else {
            Vec::new()
        };

        Ok((pool, sets))
    }
}

impl Drop for PipelineBundle {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

/// Whether a depth format carries a stencil aspect.
pub fn format_has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

unsafe fn create_shader_module(device: &ash::Device, spirv: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);

    device
        .create_shader_module(&create_info, None)
        .map_err(|e| EmberError::VulkanError(format!("Failed to create shader module: {e:?}")))
}
