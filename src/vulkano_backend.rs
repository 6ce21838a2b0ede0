use crate::descriptor::{
    BlendFactor, BlendOp, BlendState, ColorWriteMask, CompareOp, CullMode, DepthFormat, FrontFace,
    PrimitiveTopology,
};
use crate::pipeline::{CompiledShader, PipelineBackend, PipelineRequest};
use crate::reflect::VertexFormat;
use std::sync::Arc;
use vulkano::device::Device;
use vulkano::format::Format;
use vulkano::image::{ImageFormatInfo, ImageUsage, SampleCount};
use vulkano::pipeline::graphics::GraphicsPipelineCreateInfo;
use vulkano::pipeline::graphics::color_blend::{
    self, AttachmentBlend, ColorBlendAttachmentState, ColorBlendState, ColorComponents,
};
use vulkano::pipeline::graphics::depth_stencil::{self, DepthState, DepthStencilState};
use vulkano::pipeline::graphics::input_assembly::{self, InputAssemblyState};
use vulkano::pipeline::graphics::multisample::MultisampleState;
use vulkano::pipeline::graphics::rasterization::{self, RasterizationState};
use vulkano::pipeline::graphics::subpass::PipelineRenderingCreateInfo;
use vulkano::pipeline::graphics::vertex_input::{
    VertexInputAttributeDescription, VertexInputBindingDescription, VertexInputRate,
    VertexInputState,
};
use vulkano::pipeline::graphics::viewport::ViewportState;
use vulkano::pipeline::layout::PipelineDescriptorSetLayoutCreateInfo;
use vulkano::pipeline::{
    DynamicState, GraphicsPipeline, PipelineLayout, PipelineShaderStageCreateInfo,
};
use vulkano::shader::{ShaderModule, ShaderModuleCreateInfo};

/// Builds pipelines on a vulkano [`Device`] for dynamic rendering.
///
/// Viewport and scissor are dynamic, so pipelines survive swapchain resizes.
/// The returned `Arc<GraphicsPipeline>` keeps its shader modules alive for as
/// long as any command buffer still references it.
#[derive(Clone)]
pub struct VulkanoBackend {
    device: Arc<Device>,
}

impl VulkanoBackend {
    pub fn new(device: Arc<Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn stage(&self, shader: &CompiledShader) -> Result<PipelineShaderStageCreateInfo, String> {
        // SAFETY: the words were emitted by naga's SPIR-V writer after validation.
        let module = unsafe {
            ShaderModule::new(self.device.clone(), ShaderModuleCreateInfo::new(&shader.words))
        }
        .map_err(|e| format!("{} shader module: {e}", shader.stage))?;
        let entry_point = module.entry_point(&shader.entry_point).ok_or_else(|| {
            format!(
                "{} shader has no entry point `{}`",
                shader.stage, shader.entry_point
            )
        })?;
        Ok(PipelineShaderStageCreateInfo::new(entry_point))
    }
}

impl PipelineBackend for VulkanoBackend {
    type Pipeline = Arc<GraphicsPipeline>;

    fn supports_sample_count(&self, format: Format, samples: u32) -> bool {
        let Ok(count) = SampleCount::try_from(samples) else {
            return false;
        };
        let properties = self
            .device
            .physical_device()
            .image_format_properties(ImageFormatInfo {
                format,
                usage: ImageUsage::COLOR_ATTACHMENT,
                ..Default::default()
            });
        match properties {
            Ok(Some(properties)) => properties.sample_counts.contains_enum(count),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(?format, "failed to query image format properties: {e}");
                samples == 1
            }
        }
    }

    fn create_pipeline(&self, request: &PipelineRequest<'_>) -> Result<Self::Pipeline, String> {
        let descriptor = request.descriptor;
        let stages = [self.stage(request.vertex)?, self.stage(request.fragment)?];

        let layout_info = PipelineDescriptorSetLayoutCreateInfo::from_stages(&stages)
            .into_pipeline_layout_create_info(self.device.clone())
            .map_err(|e| format!("pipeline layout: {e:?}"))?;
        let layout_push_constants = layout_info
            .push_constant_ranges
            .iter()
            .map(|range| range.offset + range.size)
            .max()
            .unwrap_or(0);
        if layout_push_constants != request.push_constant_size() {
            tracing::warn!(
                reflected = request.push_constant_size(),
                layout = layout_push_constants,
                "push constant size disagrees with the pipeline layout"
            );
        }
        let layout = PipelineLayout::new(self.device.clone(), layout_info)
            .map_err(|e| format!("pipeline layout: {e}"))?;

        let mut vertex_input_state = VertexInputState::new();
        if !request.vertex_input.attributes.is_empty() {
            vertex_input_state = vertex_input_state.binding(
                0,
                VertexInputBindingDescription {
                    stride: request.vertex_input.stride,
                    input_rate: VertexInputRate::Vertex,
                    ..Default::default()
                },
            );
            for attribute in &request.vertex_input.attributes {
                vertex_input_state = vertex_input_state.attribute(
                    attribute.location,
                    VertexInputAttributeDescription {
                        binding: 0,
                        format: vertex_format(attribute.format),
                        offset: attribute.offset,
                        ..Default::default()
                    },
                );
            }
        }

        let rasterization_samples = SampleCount::try_from(request.sample_count)
            .map_err(|_| format!("invalid sample count {}", request.sample_count))?;

        let depth_attachment = descriptor.depth.attachment_format().map(depth_format);
        let depth_stencil_state = depth_attachment.map(|_| DepthStencilState {
            depth: descriptor.depth.enable.then(|| DepthState {
                write_enable: descriptor.depth.write,
                compare_op: compare_op(descriptor.depth.compare),
            }),
            ..Default::default()
        });

        let color_blend_state = ColorBlendState {
            attachments: descriptor.blends.iter().map(attachment_state).collect(),
            ..Default::default()
        };

        let rendering = PipelineRenderingCreateInfo {
            color_attachment_formats: request.color_formats.iter().copied().map(Some).collect(),
            depth_attachment_format: depth_attachment,
            ..Default::default()
        };

        let create_info = GraphicsPipelineCreateInfo {
            stages: stages.into_iter().collect(),
            vertex_input_state: Some(vertex_input_state),
            input_assembly_state: Some(InputAssemblyState {
                topology: topology(descriptor.primitive),
                ..Default::default()
            }),
            viewport_state: Some(ViewportState::default()),
            rasterization_state: Some(RasterizationState {
                cull_mode: cull_mode(descriptor.cull),
                front_face: front_face(descriptor.front_face),
                ..Default::default()
            }),
            multisample_state: Some(MultisampleState {
                rasterization_samples,
                ..Default::default()
            }),
            depth_stencil_state,
            color_blend_state: Some(color_blend_state),
            dynamic_state: [DynamicState::Viewport, DynamicState::Scissor]
                .into_iter()
                .collect(),
            subpass: Some(rendering.into()),
            ..GraphicsPipelineCreateInfo::layout(layout)
        };

        GraphicsPipeline::new(self.device.clone(), None, create_info).map_err(|e| e.to_string())
    }
}

fn vertex_format(format: VertexFormat) -> Format {
    match format {
        VertexFormat::Float => Format::R32_SFLOAT,
        VertexFormat::Float2 => Format::R32G32_SFLOAT,
        VertexFormat::Float3 => Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => Format::R32G32B32A32_SFLOAT,
        VertexFormat::Int => Format::R32_SINT,
        VertexFormat::Int2 => Format::R32G32_SINT,
        VertexFormat::Int3 => Format::R32G32B32_SINT,
        VertexFormat::Int4 => Format::R32G32B32A32_SINT,
        VertexFormat::Uint => Format::R32_UINT,
        VertexFormat::Uint2 => Format::R32G32_UINT,
        VertexFormat::Uint3 => Format::R32G32B32_UINT,
        VertexFormat::Uint4 => Format::R32G32B32A32_UINT,
    }
}

fn depth_format(format: DepthFormat) -> Format {
    match format {
        DepthFormat::D16Unorm => Format::D16_UNORM,
        DepthFormat::D32Sfloat => Format::D32_SFLOAT,
        DepthFormat::D24UnormS8Uint => Format::D24_UNORM_S8_UINT,
        DepthFormat::D32SfloatS8Uint => Format::D32_SFLOAT_S8_UINT,
    }
}

fn topology(primitive: PrimitiveTopology) -> input_assembly::PrimitiveTopology {
    use input_assembly::PrimitiveTopology as Vk;
    match primitive {
        PrimitiveTopology::PointList => Vk::PointList,
        PrimitiveTopology::LineList => Vk::LineList,
        PrimitiveTopology::LineStrip => Vk::LineStrip,
        PrimitiveTopology::TriangleList => Vk::TriangleList,
        PrimitiveTopology::TriangleStrip => Vk::TriangleStrip,
    }
}

fn cull_mode(cull: CullMode) -> rasterization::CullMode {
    match cull {
        CullMode::None => rasterization::CullMode::None,
        CullMode::Front => rasterization::CullMode::Front,
        CullMode::Back => rasterization::CullMode::Back,
    }
}

fn front_face(face: FrontFace) -> rasterization::FrontFace {
    match face {
        FrontFace::CounterClockwise => rasterization::FrontFace::CounterClockwise,
        FrontFace::Clockwise => rasterization::FrontFace::Clockwise,
    }
}

fn compare_op(op: CompareOp) -> depth_stencil::CompareOp {
    use depth_stencil::CompareOp as Vk;
    match op {
        CompareOp::Never => Vk::Never,
        CompareOp::Less => Vk::Less,
        CompareOp::Equal => Vk::Equal,
        CompareOp::LessEqual => Vk::LessOrEqual,
        CompareOp::Greater => Vk::Greater,
        CompareOp::NotEqual => Vk::NotEqual,
        CompareOp::GreaterEqual => Vk::GreaterOrEqual,
        CompareOp::Always => Vk::Always,
    }
}

fn blend_factor(factor: BlendFactor) -> color_blend::BlendFactor {
    use color_blend::BlendFactor as Vk;
    match factor {
        BlendFactor::Zero => Vk::Zero,
        BlendFactor::One => Vk::One,
        BlendFactor::SrcColor => Vk::SrcColor,
        BlendFactor::OneMinusSrcColor => Vk::OneMinusSrcColor,
        BlendFactor::DstColor => Vk::DstColor,
        BlendFactor::OneMinusDstColor => Vk::OneMinusDstColor,
        BlendFactor::SrcAlpha => Vk::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => Vk::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => Vk::DstAlpha,
        BlendFactor::OneMinusDstAlpha => Vk::OneMinusDstAlpha,
        BlendFactor::SrcAlphaSaturate => Vk::SrcAlphaSaturate,
    }
}

fn blend_op(op: BlendOp) -> color_blend::BlendOp {
    use color_blend::BlendOp as Vk;
    match op {
        BlendOp::Add => Vk::Add,
        BlendOp::Subtract => Vk::Subtract,
        BlendOp::ReverseSubtract => Vk::ReverseSubtract,
        BlendOp::Min => Vk::Min,
        BlendOp::Max => Vk::Max,
    }
}

fn write_mask(mask: ColorWriteMask) -> ColorComponents {
    let mut components = ColorComponents::empty();
    for (bit, component) in [
        (ColorWriteMask::R, ColorComponents::R),
        (ColorWriteMask::G, ColorComponents::G),
        (ColorWriteMask::B, ColorComponents::B),
        (ColorWriteMask::A, ColorComponents::A),
    ] {
        if mask.contains(bit) {
            components = components | component;
        }
    }
    components
}

fn attachment_state(blend: &BlendState) -> ColorBlendAttachmentState {
    ColorBlendAttachmentState {
        blend: blend.enable.then(|| AttachmentBlend {
            src_color_blend_factor: blend_factor(blend.src_color),
            dst_color_blend_factor: blend_factor(blend.dst_color),
            color_blend_op: blend_op(blend.color_op),
            src_alpha_blend_factor: blend_factor(blend.src_alpha),
            dst_alpha_blend_factor: blend_factor(blend.dst_alpha),
            alpha_blend_op: blend_op(blend.alpha_op),
        }),
        color_write_mask: write_mask(blend.write_mask),
        ..Default::default()
    }
}
