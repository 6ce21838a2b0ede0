//! Pipeline construction over an abstract graphics backend.
//!
//! [`PipelineBuilder`] owns the device-independent half of the job: it
//! negotiates a sample count the device supports, checks that the blend
//! arity matches the color targets and hands a complete [`PipelineRequest`]
//! to the backend. The backend only has to translate the request into its own
//! API objects.

use crate::descriptor::PipelineDescriptor;
use crate::error::{ReloadError, Result};
use crate::reflect::{ReflectedResources, ReflectedVertexInput};
use crate::source::ShaderStage;
use vulkano::format::Format;

/// Sample counts tried, best first, when the requested one is unsupported.
pub const SAMPLE_COUNT_CANDIDATES: [u32; 4] = [8, 4, 2, 1];

/// One compiled and reflected shader stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub words: Vec<u32>,
    pub resources: ReflectedResources,
}

/// Everything a backend needs to create one graphics pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineRequest<'a> {
    pub vertex: &'a CompiledShader,
    pub fragment: &'a CompiledShader,
    pub vertex_input: &'a ReflectedVertexInput,
    pub descriptor: &'a PipelineDescriptor,
    pub color_formats: &'a [Format],
    /// Already negotiated.
    pub sample_count: u32,
}

impl PipelineRequest<'_> {
    /// Largest push-constant block declared by either stage.
    pub fn push_constant_size(&self) -> u32 {
        self.vertex
            .resources
            .push_constant_size
            .max(self.fragment.resources.push_constant_size)
    }
}

/// The graphics API collaborator.
pub trait PipelineBackend {
    /// Opaque, bindable pipeline handle. Dropping it releases the pipeline.
    type Pipeline;

    /// Whether color attachments of `format` can be rendered with `samples`
    /// samples per pixel.
    fn supports_sample_count(&self, format: Format, samples: u32) -> bool;

    /// Creates the pipeline, returning the device's error text on rejection.
    fn create_pipeline(&self, request: &PipelineRequest<'_>) -> Result<Self::Pipeline, String>;
}

/// Emitted when the negotiated sample count differs from the one the
/// renderer currently uses. Multisampled intermediate targets must be
/// recreated at `current` before the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCountChange {
    pub previous: u32,
    pub current: u32,
}

/// A freshly created pipeline and the sample count it was built for.
#[derive(Debug)]
pub struct BuiltPipeline<P> {
    pub pipeline: P,
    pub sample_count: u32,
    pub sample_count_change: Option<SampleCountChange>,
}

/// Picks the sample count to build with.
///
/// The requested count wins if the device supports it; otherwise the highest
/// candidate not above the request that the device supports, else 1.
pub fn negotiate_sample_count<B: PipelineBackend + ?Sized>(
    backend: &B,
    format: Format,
    requested: u32,
) -> u32 {
    let requested = requested.max(1);
    if backend.supports_sample_count(format, requested) {
        return requested;
    }
    SAMPLE_COUNT_CANDIDATES
        .into_iter()
        .filter(|&candidate| candidate <= requested)
        .find(|&candidate| backend.supports_sample_count(format, candidate))
        .unwrap_or(1)
}

/// Turns compiled stages and a descriptor into a backend pipeline.
pub struct PipelineBuilder<'a, B: PipelineBackend> {
    backend: &'a B,
    color_formats: &'a [Format],
}

impl<'a, B: PipelineBackend> PipelineBuilder<'a, B> {
    pub fn new(backend: &'a B, color_formats: &'a [Format]) -> Self {
        Self {
            backend,
            color_formats,
        }
    }

    /// Builds a pipeline. Nothing is created, and nothing owned by the caller
    /// is touched, unless every check and the backend call succeed.
    ///
    /// # Errors
    ///
    /// `PipelineCreateFailed` if the blend arity does not match the color
    /// targets or the backend rejects the request.
    pub fn build(
        &self,
        vertex: &CompiledShader,
        fragment: &CompiledShader,
        vertex_input: &ReflectedVertexInput,
        descriptor: &PipelineDescriptor,
        active_sample_count: u32,
    ) -> Result<BuiltPipeline<B::Pipeline>> {
        let Some(&primary) = self.color_formats.first() else {
            return Err(ReloadError::PipelineCreateFailed(
                "no color target formats configured".to_owned(),
            ));
        };
        if descriptor.blends.len() != self.color_formats.len() {
            return Err(ReloadError::PipelineCreateFailed(format!(
                "{} blend states for {} color targets",
                descriptor.blends.len(),
                self.color_formats.len()
            )));
        }

        let sample_count = negotiate_sample_count(self.backend, primary, descriptor.sample_count);
        if sample_count != descriptor.sample_count {
            tracing::info!(
                requested = descriptor.sample_count,
                samples = sample_count,
                format = ?primary,
                "requested sample count unsupported, negotiated down"
            );
        }

        let request = PipelineRequest {
            vertex,
            fragment,
            vertex_input,
            descriptor,
            color_formats: self.color_formats,
            sample_count,
        };
        let pipeline = self
            .backend
            .create_pipeline(&request)
            .map_err(ReloadError::PipelineCreateFailed)?;

        let sample_count_change = (sample_count != active_sample_count).then_some(SampleCountChange {
            previous: active_sample_count,
            current: sample_count,
        });

        Ok(BuiltPipeline {
            pipeline,
            sample_count,
            sample_count_change,
        })
    }
}
