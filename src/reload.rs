//! The live program and the coordinator that rebuilds it.
//!
//! Rebuilds always happen into a scratch [`Program`]; the live one is only
//! replaced, by a single move, after every step succeeded. Because
//! [`ReloadCoordinator::tick`] runs on the render thread between frames, the
//! swap can never land in the middle of recording a frame.

use crate::builder::ReloadCoordinatorBuilder;
use crate::compile::{OptimizationLevel, compile_file, resolve_optimization};
use crate::descriptor::PipelineDescriptor;
use crate::diagnostics::{DiagnosticsSink, ReloadEvent};
use crate::error::{ReloadError, Result};
use crate::pipeline::{CompiledShader, PipelineBackend, PipelineBuilder, SampleCountChange};
use crate::reflect::{ReflectedResources, ReflectedVertexInput, reflect_resources, reflect_vertex_input};
use crate::source::{Digest, ShaderFile, ShaderStage, SourceRegistry};
use crate::vulkano_backend::VulkanoBackend;
use crate::watcher::{ChangeSource, TrackedFile};
use bevy::prelude::Resource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vulkano::format::Format;

/// One shader stage of a program: the source it came from and what it
/// compiled to.
#[derive(Debug, Clone)]
pub struct StageState {
    pub file: ShaderFile,
    pub compiled: CompiledShader,
}

/// A fully built vertex + fragment program.
///
/// Fields drop in declaration order, so the pipeline is released before the
/// shader binaries it was created from.
#[derive(Debug)]
pub struct Program<P> {
    pipeline: P,
    vertex: StageState,
    fragment: StageState,
    descriptor: PipelineDescriptor,
    descriptor_path: PathBuf,
    descriptor_digest: Digest,
    vertex_input: ReflectedVertexInput,
    sample_count: u32,
}

impl<P> Program<P> {
    /// The bindable pipeline handle.
    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn vertex_input(&self) -> &ReflectedVertexInput {
        &self.vertex_input
    }

    pub fn vertex_stride(&self) -> u32 {
        self.vertex_input.stride
    }

    pub fn vertex_resources(&self) -> &ReflectedResources {
        &self.vertex.compiled.resources
    }

    pub fn fragment_resources(&self) -> &ReflectedResources {
        &self.fragment.compiled.resources
    }

    /// Largest push-constant block of either stage.
    pub fn push_constant_size(&self) -> u32 {
        self.vertex_resources()
            .push_constant_size
            .max(self.fragment_resources().push_constant_size)
    }

    /// Negotiated sample count the pipeline was built for.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    pub fn stage(&self, stage: ShaderStage) -> &StageState {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    /// Vertex source, fragment source and descriptor, with the digests the
    /// live pipeline was built from.
    pub fn tracked_files(&self) -> Vec<TrackedFile> {
        vec![
            TrackedFile {
                path: self.vertex.file.path.clone(),
                digest: self.vertex.file.digest,
            },
            TrackedFile {
                path: self.fragment.file.path.clone(),
                digest: self.fragment.file.digest,
            },
            TrackedFile {
                path: self.descriptor_path.clone(),
                digest: self.descriptor_digest,
            },
        ]
    }
}

/// Result of one [`ReloadCoordinator::tick`].
#[derive(Debug)]
pub enum ReloadOutcome {
    /// Nothing changed, or only content that already failed once.
    Unchanged,
    Reloaded,
    /// The live program was kept.
    Failed(ReloadError),
}

/// A file a build read, or tried to read. `None` means it was missing.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BuildInput {
    path: PathBuf,
    digest: Option<Digest>,
}

/// Settings fixed when the coordinator is built.
#[derive(Debug, Clone)]
pub(crate) struct ReloadSettings {
    pub descriptor_path: PathBuf,
    pub source_root: PathBuf,
    pub color_formats: Vec<Format>,
    pub optimization_override: Option<OptimizationLevel>,
}

impl ReloadSettings {
    fn program_name(&self) -> String {
        self.descriptor_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.descriptor_path.display().to_string())
    }
}

/// Owns the live program and keeps it in sync with the files on disk.
///
/// Call [`tick`](Self::tick) once per frame, between frames.
#[derive(Resource)]
pub struct ReloadCoordinator<B: PipelineBackend> {
    program: Program<B::Pipeline>,
    backend: B,
    settings: ReloadSettings,
    registry: SourceRegistry,
    change_source: Box<dyn ChangeSource>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    active_sample_count: u32,
    sample_count_change: Option<SampleCountChange>,
    rejected: Vec<BuildInput>,
}

impl ReloadCoordinator<VulkanoBackend> {
    /// Creates a builder for the program described by `descriptor_path`.
    ///
    /// Defined for [`VulkanoBackend`]. Other backends start from
    /// [`ReloadCoordinatorBuilder::new`].
    ///
    /// # Arguments
    ///
    /// * `descriptor_path` - Path to the JSON pipeline descriptor
    pub fn builder(descriptor_path: impl AsRef<Path>) -> ReloadCoordinatorBuilder {
        ReloadCoordinatorBuilder::new(descriptor_path)
    }
}

impl<B: PipelineBackend> ReloadCoordinator<B> {
    /// Performs the initial build. Any error here is fatal to the caller.
    pub(crate) fn new(
        backend: B,
        settings: ReloadSettings,
        registry: SourceRegistry,
        change_source: Box<dyn ChangeSource>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        active_sample_count: u32,
    ) -> Result<Self> {
        let name = settings.program_name();
        diagnostics.record(ReloadEvent::RebuildStarted {
            program: name.clone(),
        });
        let built = build_program(
            &backend,
            &settings,
            &registry,
            diagnostics.as_ref(),
            active_sample_count,
            &mut Vec::new(),
        );
        let (program, sample_count_change) = match built {
            Ok(built) => built,
            Err(e) => {
                diagnostics.record(ReloadEvent::Failed {
                    program: name,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        if let Some(change) = sample_count_change {
            diagnostics.record(ReloadEvent::SampleCountChanged(change));
        }
        tracing::info!(
            program = %name,
            samples = program.sample_count,
            stride = program.vertex_input.stride,
            "initial pipeline built"
        );

        Ok(Self {
            active_sample_count: program.sample_count,
            program,
            backend,
            settings,
            registry,
            change_source,
            diagnostics,
            sample_count_change,
            rejected: Vec::new(),
        })
    }

    pub fn program(&self) -> &Program<B::Pipeline> {
        &self.program
    }

    /// Shortcut for `program().pipeline()`.
    pub fn pipeline(&self) -> &B::Pipeline {
        &self.program.pipeline
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn descriptor_path(&self) -> &Path {
        &self.settings.descriptor_path
    }

    /// Sample count the renderer's multisampled targets must currently use.
    pub fn active_sample_count(&self) -> u32 {
        self.active_sample_count
    }

    /// Takes the pending "sample count changed" signal, if any. Each change
    /// is returned exactly once.
    pub fn take_sample_count_change(&mut self) -> Option<SampleCountChange> {
        self.sample_count_change.take()
    }

    /// Polls for changes and rebuilds if any tracked file is dirty.
    ///
    /// Never fails: a broken rebuild is logged, the live program stays bound
    /// and the same broken inputs are not retried until one of the files the
    /// failed build read changes again.
    pub fn tick(&mut self) -> ReloadOutcome {
        let tracked = self.program.tracked_files();
        let changes = self.change_source.poll(&tracked, &self.registry);
        if changes.is_empty() || self.inputs_still_rejected() {
            return ReloadOutcome::Unchanged;
        }

        for change in &changes {
            tracing::debug!(path = %change.path.display(), digest = ?change.digest, "source changed");
        }
        match self.rebuild() {
            Ok(()) => ReloadOutcome::Reloaded,
            Err(e) => ReloadOutcome::Failed(e),
        }
    }

    /// True while every file the last failed build read is still exactly as
    /// it was, missing files included.
    fn inputs_still_rejected(&self) -> bool {
        !self.rejected.is_empty()
            && self.rejected.iter().all(|input| {
                match self.registry.reread_stable(&input.path) {
                    Ok(bytes) => input.digest == Some(Digest::of(&bytes)),
                    Err(ReloadError::NotFound { .. }) => input.digest.is_none(),
                    Err(_) => false,
                }
            })
    }

    /// Rebuilds unconditionally.
    ///
    /// # Errors
    ///
    /// Returns the rebuild error after logging it; the live program is kept.
    pub fn reload(&mut self) -> Result<()> {
        self.rebuild()
    }

    fn rebuild(&mut self) -> Result<()> {
        let name = self.settings.program_name();
        self.diagnostics.record(ReloadEvent::RebuildStarted {
            program: name.clone(),
        });

        let mut inputs = Vec::new();
        let built = build_program(
            &self.backend,
            &self.settings,
            &self.registry,
            self.diagnostics.as_ref(),
            self.active_sample_count,
            &mut inputs,
        );
        let (program, sample_count_change) = match built {
            Ok(built) => built,
            Err(e) => {
                // Transient read errors are retried on the next poll.
                self.rejected = if e.is_transient() { Vec::new() } else { inputs };
                self.diagnostics.record(ReloadEvent::Failed {
                    program: name,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        // The old program drops here, pipeline first.
        drop(std::mem::replace(&mut self.program, program));
        self.rejected.clear();
        self.diagnostics.record(ReloadEvent::Swapped { program: name });

        if let Some(change) = sample_count_change {
            self.active_sample_count = change.current;
            self.sample_count_change = Some(change);
            self.diagnostics
                .record(ReloadEvent::SampleCountChanged(change));
        }
        Ok(())
    }
}

/// Runs descriptor load, compile, reflect and pipeline creation into a fresh
/// program. Touches nothing but the backend.
///
/// Every file read, or found missing, is appended to `inputs`, also when the
/// build fails part way.
fn build_program<B: PipelineBackend>(
    backend: &B,
    settings: &ReloadSettings,
    registry: &SourceRegistry,
    diagnostics: &dyn DiagnosticsSink,
    active_sample_count: u32,
    inputs: &mut Vec<BuildInput>,
) -> Result<(Program<B::Pipeline>, Option<SampleCountChange>)> {
    let descriptor_path = &settings.descriptor_path;
    let descriptor_bytes = read_input(registry, descriptor_path, inputs)
        .map_err(|e| match e {
            ReloadError::NotFound { path } => ReloadError::ConfigNotFound { path },
            other => other,
        })?;
    let descriptor = PipelineDescriptor::from_slice(
        &descriptor_bytes,
        descriptor_path,
        settings.color_formats.len(),
    )?;
    let descriptor_digest = Digest::of(&descriptor_bytes);

    let vertex = build_stage(
        ShaderStage::Vertex,
        &descriptor,
        settings,
        registry,
        diagnostics,
        inputs,
    )?;
    let fragment = build_stage(
        ShaderStage::Fragment,
        &descriptor,
        settings,
        registry,
        diagnostics,
        inputs,
    )?;

    let vertex_input = reflect_vertex_input(&vertex.compiled.words)?;
    diagnostics.record(ReloadEvent::Reflected {
        attributes: vertex_input.attributes.len(),
        stride: vertex_input.stride,
        push_constant_size: vertex
            .compiled
            .resources
            .push_constant_size
            .max(fragment.compiled.resources.push_constant_size),
    });

    let built = PipelineBuilder::new(backend, &settings.color_formats).build(
        &vertex.compiled,
        &fragment.compiled,
        &vertex_input,
        &descriptor,
        active_sample_count,
    )?;
    diagnostics.record(ReloadEvent::Built {
        sample_count: built.sample_count,
    });

    let program = Program {
        pipeline: built.pipeline,
        vertex,
        fragment,
        descriptor,
        descriptor_path: descriptor_path.clone(),
        descriptor_digest,
        vertex_input,
        sample_count: built.sample_count,
    };
    Ok((program, built.sample_count_change))
}

fn build_stage(
    stage: ShaderStage,
    descriptor: &PipelineDescriptor,
    settings: &ReloadSettings,
    registry: &SourceRegistry,
    diagnostics: &dyn DiagnosticsSink,
    inputs: &mut Vec<BuildInput>,
) -> Result<StageState> {
    let path = settings.source_root.join(descriptor.shader_path(stage));
    let file = ShaderFile::from_bytes(stage, &path, read_input(registry, &path, inputs)?)?;

    let hints = &descriptor.optimization;
    let stage_hint = match stage {
        ShaderStage::Vertex => hints.vertex,
        ShaderStage::Fragment => hints.fragment,
    };
    let level = resolve_optimization(stage_hint, hints.default, settings.optimization_override);
    let entry_point = descriptor.entry_points.for_stage(stage);

    let words = compile_file(&file, entry_point, level)?;
    diagnostics.record(ReloadEvent::Compiled {
        stage,
        path: path.clone(),
        words: words.len(),
    });
    let resources = reflect_resources(&words)?;

    Ok(StageState {
        file,
        compiled: CompiledShader {
            stage,
            entry_point: entry_point.to_owned(),
            words,
            resources,
        },
    })
}

/// Stable read that also records what was seen.
fn read_input(
    registry: &SourceRegistry,
    path: &Path,
    inputs: &mut Vec<BuildInput>,
) -> Result<Vec<u8>> {
    let read = registry.reread_stable(path);
    let path = path.to_path_buf();
    match &read {
        Ok(bytes) => inputs.push(BuildInput {
            path,
            digest: Some(Digest::of(bytes)),
        }),
        Err(ReloadError::NotFound { .. }) => inputs.push(BuildInput { path, digest: None }),
        Err(_) => {}
    }
    read
}
