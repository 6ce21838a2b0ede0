//! Hot-reloading of shader source into live Vulkan graphics pipelines.
//!
//! Edit a GLSL or WGSL file (or the JSON pipeline descriptor next to it) while
//! the application runs and the change shows up on the next frame. Sources
//! are cross-compiled to SPIR-V with naga, reflected to derive the vertex
//! layout and binding counts, and built into a new pipeline that replaces the
//! old one only once everything succeeded. A broken edit is logged and the
//! previous pipeline stays bound.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bevy::prelude::*;
//! use shader_pipeline_hotreload::{
//!     ReloadCoordinator, ReloadLog, ReloadOutcome, VulkanoBackend,
//! };
//! use std::sync::Arc;
//! use vulkano::device::Device;
//!
//! fn setup_shader_hotreload(mut commands: Commands, device: Arc<Device>) {
//!     let log = ReloadLog::new();
//!
//!     match ReloadCoordinator::builder("shaders/triangle.json")
//!         .diagnostics(Arc::new(log.clone()))
//!         .build(VulkanoBackend::new(device))
//!     {
//!         Ok(coordinator) => commands.insert_resource(coordinator),
//!         Err(e) => {
//!             eprintln!("Failed to build initial pipeline: {}", e);
//!             std::process::exit(1);
//!         }
//!     }
//!     commands.insert_resource(log);
//! }
//!
//! fn reload_shaders(mut coordinator: ResMut<ReloadCoordinator<VulkanoBackend>>) {
//!     if let ReloadOutcome::Reloaded = coordinator.tick() {
//!         if let Some(change) = coordinator.take_sample_count_change() {
//!             // Recreate multisampled targets at `change.current` samples.
//!         }
//!     }
//!     let _pipeline = coordinator.pipeline().clone();
//! }
//! ```

pub mod builder;
pub mod compile;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod reflect;
pub mod reload;
pub mod source;
mod spirv;
pub mod vulkano_backend;
pub mod watcher;

pub use builder::ReloadCoordinatorBuilder;
pub use compile::{OptimizationLevel, compile};
pub use descriptor::PipelineDescriptor;
pub use diagnostics::{DiagnosticsSink, ReloadEvent, ReloadLog};
pub use error::{ReloadError, Result};
pub use pipeline::{
    CompiledShader, PipelineBackend, PipelineRequest, SampleCountChange, negotiate_sample_count,
};
pub use reflect::{
    ReflectedResources, ReflectedVertexInput, VertexAttribute, VertexFormat, reflect_resources,
    reflect_vertex_input,
};
pub use reload::{Program, ReloadCoordinator, ReloadOutcome};
pub use source::{Digest, ShaderFile, ShaderStage, SourceReader, SourceRegistry};
pub use vulkano_backend::VulkanoBackend;
pub use watcher::{ChangeSource, NotifyChangeSource, PollingChangeSource, TrackedFile};

const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_STABLE_DELAY_MS: u64 = 8;
const DEFAULT_STABLE_ATTEMPTS: u32 = 12;
const DEFAULT_COLOR_FORMAT: vulkano::format::Format = vulkano::format::Format::B8G8R8A8_SRGB;
