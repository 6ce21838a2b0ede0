use crate::compile::{OptimizationLevel, optimization_from_env};
use crate::diagnostics::{DiagnosticsSink, ReloadLog};
use crate::error::Result;
use crate::pipeline::PipelineBackend;
use crate::reload::{ReloadCoordinator, ReloadSettings};
use crate::source::{FsReader, SourceReader, SourceRegistry, StableReadPolicy};
use crate::watcher::{ChangeSource, PollingChangeSource};
use crate::{
    DEFAULT_COLOR_FORMAT, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STABLE_ATTEMPTS,
    DEFAULT_STABLE_DELAY_MS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use vulkano::format::Format;

/// Builder for configuring a [`ReloadCoordinator`].
///
/// Everything has a default; only the descriptor path is required.
///
/// # Example
///
/// ```rust,no_run
/// use shader_pipeline_hotreload::{ReloadCoordinator, ReloadLog, VulkanoBackend};
/// use std::sync::Arc;
/// use vulkano::device::Device;
/// use vulkano::format::Format;
///
/// fn setup(device: Arc<Device>, log: ReloadLog) -> ReloadCoordinator<VulkanoBackend> {
///     ReloadCoordinator::builder("shaders/triangle.json")
///         .color_format(Format::B8G8R8A8_SRGB)
///         .poll_interval_ms(250)
///         .diagnostics(Arc::new(log))
///         .build(VulkanoBackend::new(device))
///         .expect("Failed to build the initial pipeline")
/// }
/// ```
pub struct ReloadCoordinatorBuilder {
    descriptor_path: PathBuf,
    source_root: Option<PathBuf>,
    color_formats: Vec<Format>,
    poll_interval_ms: u64,
    stable_read_delay_ms: u64,
    stable_read_attempts: u32,
    optimization_override: Option<OptimizationLevel>,
    active_sample_count: u32,
    change_source: Option<Box<dyn ChangeSource>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    source_reader: Option<Arc<dyn SourceReader>>,
}

impl ReloadCoordinatorBuilder {
    /// Creates a new builder with default settings.
    ///
    /// # Arguments
    ///
    /// * `descriptor_path` - Path to the JSON pipeline descriptor
    pub fn new(descriptor_path: impl AsRef<Path>) -> Self {
        Self {
            descriptor_path: descriptor_path.as_ref().to_path_buf(),
            source_root: None,
            color_formats: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stable_read_delay_ms: DEFAULT_STABLE_DELAY_MS,
            stable_read_attempts: DEFAULT_STABLE_ATTEMPTS,
            optimization_override: optimization_from_env(),
            active_sample_count: 1,
            change_source: None,
            diagnostics: None,
            source_reader: None,
        }
    }

    /// Sets the directory shader file names in the descriptor resolve
    /// against. Defaults to the descriptor's own directory.
    ///
    /// # Arguments
    ///
    /// * `root` - Directory containing the shader sources
    pub fn source_root(mut self, root: impl AsRef<Path>) -> Self {
        self.source_root = Some(root.as_ref().to_path_buf());
        self
    }

    /// Adds a color target. The number of calls fixes how many blend states
    /// the descriptor is expanded to. With no calls, a single
    /// `B8G8R8A8_SRGB` target is assumed.
    ///
    /// # Arguments
    ///
    /// * `format` - Format of the color attachment
    pub fn color_format(mut self, format: Format) -> Self {
        self.color_formats.push(format);
        self
    }

    /// Sets how often the default polling change source checks files.
    ///
    /// # Arguments
    ///
    /// * `ms` - Minimum time between two polls in milliseconds
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the pause between the two reads of a stable read.
    ///
    /// # Arguments
    ///
    /// * `ms` - Delay between the paired reads in milliseconds
    pub fn stable_read_delay_ms(mut self, ms: u64) -> Self {
        self.stable_read_delay_ms = ms;
        self
    }

    /// Sets how many read pairs are tried before a file counts as unstable.
    ///
    /// The worst-case stall per file is `attempts * delay`.
    ///
    /// # Arguments
    ///
    /// * `attempts` - Number of read pairs before giving up
    pub fn stable_read_attempts(mut self, attempts: u32) -> Self {
        self.stable_read_attempts = attempts;
        self
    }

    /// Overrides the environment-level optimization level. Descriptor hints
    /// still take priority.
    ///
    /// # Arguments
    ///
    /// * `level` - Level used when the descriptor gives no hint
    pub fn optimization_override(mut self, level: OptimizationLevel) -> Self {
        self.optimization_override = Some(level);
        self
    }

    /// Sets the sample count the renderer's targets currently use, so the
    /// first build can report whether they need recreating.
    ///
    /// # Arguments
    ///
    /// * `samples` - Current sample count of the render targets
    pub fn active_sample_count(mut self, samples: u32) -> Self {
        self.active_sample_count = samples.max(1);
        self
    }

    /// Replaces the default [`PollingChangeSource`].
    ///
    /// # Arguments
    ///
    /// * `source` - Detector consulted on every tick
    pub fn change_source(mut self, source: Box<dyn ChangeSource>) -> Self {
        self.change_source = Some(source);
        self
    }

    /// Sets where reload events go. Defaults to a fresh [`ReloadLog`].
    ///
    /// # Arguments
    ///
    /// * `sink` - Receiver for every reload event
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Replaces the filesystem reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - Reader used for every source and descriptor read
    pub fn source_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.source_reader = Some(reader);
        self
    }

    /// Builds the initial program and the coordinator around it.
    ///
    /// # Errors
    ///
    /// Any error from the initial build. There is no previous pipeline to
    /// fall back on, so callers should treat this as fatal.
    pub fn build<B: PipelineBackend>(self, backend: B) -> Result<ReloadCoordinator<B>> {
        let source_root = match self.source_root {
            Some(root) => root,
            None => self
                .descriptor_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        let color_formats = if self.color_formats.is_empty() {
            vec![DEFAULT_COLOR_FORMAT]
        } else {
            self.color_formats
        };

        let registry = SourceRegistry::new(
            self.source_reader.unwrap_or_else(|| Arc::new(FsReader)),
            StableReadPolicy {
                delay: Duration::from_millis(self.stable_read_delay_ms),
                attempts: self.stable_read_attempts,
            },
        );
        let change_source = self.change_source.unwrap_or_else(|| {
            Box::new(PollingChangeSource::new(Duration::from_millis(
                self.poll_interval_ms,
            )))
        });
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(ReloadLog::new()));

        ReloadCoordinator::new(
            backend,
            ReloadSettings {
                descriptor_path: self.descriptor_path,
                source_root,
                color_formats,
                optimization_override: self.optimization_override,
            },
            registry,
            change_source,
            diagnostics,
            self.active_sample_count,
        )
    }
}
