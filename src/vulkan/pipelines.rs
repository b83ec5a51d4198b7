use std::sync::Arc;

use ash::vk;

use super::{
    context::Context,
    render_targets::{COLOR_FORMAT, DEPTH_FORMAT, VELOCITY_FORMAT},
    shader_create_info::ShaderModule,
};
use crate::{
    config::ShaderPaths,
    error::{Error, Result, VkResultExt},
    gpu::PipelineKind,
    scene::Vertex,
};

/// The raster pipelines of the scene pass. Both share one layout with the scene descriptor set.
pub struct ScenePipelines {
    pub layout: vk::PipelineLayout,
    pub opaque: vk::Pipeline,
    pub transparent: vk::Pipeline,
    context: Arc<Context>,
}

impl ScenePipelines {
    pub fn new(
        context: Arc<Context>,
        shaders: &ShaderPaths,
        descriptor_set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let device = &context.device;

        let vertex = ShaderModule::from_file(
            context.clone(),
            vk::ShaderStageFlags::VERTEX,
            &shaders.vertex,
        )?;
        let opaque_fragment = ShaderModule::from_file(
            context.clone(),
            vk::ShaderStageFlags::FRAGMENT,
            &shaders.opaque_fragment,
        )?;
        let transparent_fragment = ShaderModule::from_file(
            context.clone(),
            vk::ShaderStageFlags::FRAGMENT,
            &shaders.transparent_fragment,
        )?;

        let layout_create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(std::slice::from_ref(&descriptor_set_layout));
        let layout = unsafe { device.create_pipeline_layout(&layout_create_info, None) }
            .vk_context("Could not create pipeline layout")?;

        let opaque = create_pipeline(
            device,
            layout,
            [vertex.stage_create_info(), opaque_fragment.stage_create_info()],
            PipelineKind::Opaque,
        );
        let transparent = create_pipeline(
            device,
            layout,
            [vertex.stage_create_info(), transparent_fragment.stage_create_info()],
            PipelineKind::Transparent,
        );

        match (opaque, transparent) {
            (Ok(opaque), Ok(transparent)) => Ok(Self {
                layout,
                opaque,
                transparent,
                context,
            }),
            (opaque, transparent) => {
                for pipeline in [&opaque, &transparent].into_iter().flatten() {
                    unsafe { device.destroy_pipeline(*pipeline, None) };
                }
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(opaque.and(transparent).err().unwrap_or(Error::Vulkan {
                    context: "Could not create graphics pipeline",
                    result: vk::Result::ERROR_UNKNOWN,
                }))
            }
        }
    }

    pub fn pipeline(&self, kind: PipelineKind) -> vk::Pipeline {
        match kind {
            PipelineKind::Opaque => self.opaque,
            PipelineKind::Transparent => self.transparent,
        }
    }
}

impl Drop for ScenePipelines {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe { device.destroy_pipeline(self.opaque, None) };
        unsafe { device.destroy_pipeline(self.transparent, None) };
        unsafe { device.destroy_pipeline_layout(self.layout, None) };
    }
}

fn create_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    shader_stages: [vk::PipelineShaderStageCreateInfo; 2],
    kind: PipelineKind,
) -> Result<vk::Pipeline> {
    let transparent = kind == PipelineKind::Transparent;

    let (vertex_input_binding_descriptions, vertex_input_attribute_descriptions) = (
        Vertex::binding_descriptions(),
        Vertex::attribute_descriptions(),
    );

    let vertex_input_state_create_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&vertex_input_binding_descriptions)
        .vertex_attribute_descriptions(&vertex_input_attribute_descriptions);

    let input_assembly_state_create_info = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    let viewport_state_create_info = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    // Transparent surfaces are seen from both sides.
    let cull_mode = if transparent {
        vk::CullModeFlags::NONE
    } else {
        vk::CullModeFlags::BACK
    };
    let rasterization_state_create_info = vk::PipelineRasterizationStateCreateInfo::builder()
        .cull_mode(cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0)
        .polygon_mode(vk::PolygonMode::FILL);

    let multisample_state_create_info = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil_state_create_info = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(!transparent)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false)
        .max_depth_bounds(1.0)
        .min_depth_bounds(0.0);

    let color = if transparent {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::TRUE,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    } else {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        }
    };
    // Motion of what is behind a transparent surface is kept.
    let velocity = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        color_write_mask: if transparent {
            vk::ColorComponentFlags::empty()
        } else {
            vk::ColorComponentFlags::R | vk::ColorComponentFlags::G
        },
        ..Default::default()
    };
    let color_blend_attachment_states = [color, velocity];

    let color_blend_state =
        vk::PipelineColorBlendStateCreateInfo::builder().attachments(&color_blend_attachment_states);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let color_attachment_formats = [COLOR_FORMAT, VELOCITY_FORMAT];
    let mut rendering_create_info = vk::PipelineRenderingCreateInfo::builder()
        .color_attachment_formats(&color_attachment_formats)
        .depth_attachment_format(DEPTH_FORMAT);

    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state_create_info)
        .input_assembly_state(&input_assembly_state_create_info)
        .viewport_state(&viewport_state_create_info)
        .rasterization_state(&rasterization_state_create_info)
        .multisample_state(&multisample_state_create_info)
        .depth_stencil_state(&depth_stencil_state_create_info)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_create_info);

    let pipelines = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&create_info),
            None,
        )
    }
    .map_err(|(_, result)| result)
    .vk_context("Could not create graphics pipeline")?;

    Ok(pipelines[0])
}
