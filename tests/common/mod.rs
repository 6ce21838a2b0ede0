#![allow(dead_code)]

use parking_lot::Mutex;
use shader_pipeline_hotreload::descriptor::{CullMode, PrimitiveTopology};
use shader_pipeline_hotreload::{
    PipelineBackend, PipelineRequest, ReflectedResources, ReflectedVertexInput, ReloadCoordinator,
    ReloadCoordinatorBuilder, ReloadLog,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tempfile::TempDir;
use vulkano::format::Format;

pub const TRIANGLE_VERT: &str = r#"#version 450
layout(location = 2) in vec3 a_color;
layout(location = 0) in vec2 a_position;
layout(location = 1) in float a_scale;
layout(location = 0) out vec3 v_color;

void main() {
    v_color = a_color;
    gl_Position = vec4(a_position * a_scale, 0.0, 1.0);
}
"#;

pub const TRIANGLE_FRAG: &str = r#"#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 o_color;

layout(set = 0, binding = 0) uniform Globals {
    vec4 tint;
};

void main() {
    o_color = vec4(v_color, 1.0) * tint;
}
"#;

pub const DIMMED_FRAG: &str = r#"#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 o_color;

layout(set = 0, binding = 0) uniform Globals {
    vec4 tint;
};

void main() {
    o_color = vec4(v_color * 0.5, 1.0) * tint;
}
"#;

pub const BROKEN_FRAG: &str = "#version 450\nvoid main() {\n    this is not glsl;\n}\n";

pub const DEFAULT_DESCRIPTOR: &str =
    r#"{ "vertex_shader": "triangle.vert", "fragment_shader": "triangle.frag" }"#;

/// What the mock device was asked to build.
#[derive(Debug)]
pub struct MockPipeline {
    pub id: usize,
    pub vertex_input: ReflectedVertexInput,
    pub vertex_resources: ReflectedResources,
    pub fragment_resources: ReflectedResources,
    pub blend_enabled: Vec<bool>,
    pub depth_test: bool,
    pub topology: PrimitiveTopology,
    pub cull: CullMode,
    pub sample_count: u32,
    pub color_formats: Vec<Format>,
}

/// Records every pipeline it creates and can be told to reject the next one.
pub struct RecordingBackend {
    supported_samples: Vec<u32>,
    created: AtomicUsize,
    reject_next: AtomicBool,
    pipelines: Mutex<Vec<Weak<MockPipeline>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::supporting(&[1, 2, 4, 8])
    }

    pub fn supporting(samples: &[u32]) -> Self {
        Self {
            supported_samples: samples.to_vec(),
            created: AtomicUsize::new(0),
            reject_next: AtomicBool::new(false),
            pipelines: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Pipelines created so far that something still holds.
    pub fn alive(&self) -> usize {
        self.pipelines
            .lock()
            .iter()
            .filter(|p| p.strong_count() > 0)
            .count()
    }

    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }
}

impl PipelineBackend for RecordingBackend {
    type Pipeline = Arc<MockPipeline>;

    fn supports_sample_count(&self, _format: Format, samples: u32) -> bool {
        self.supported_samples.contains(&samples)
    }

    fn create_pipeline(&self, request: &PipelineRequest<'_>) -> Result<Self::Pipeline, String> {
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err("device rejected pipeline".to_owned());
        }
        assert_eq!(request.vertex.words[0], 0x0723_0203);
        assert_eq!(request.fragment.words[0], 0x0723_0203);

        let pipeline = Arc::new(MockPipeline {
            id: self.created.fetch_add(1, Ordering::SeqCst),
            vertex_input: request.vertex_input.clone(),
            vertex_resources: request.vertex.resources,
            fragment_resources: request.fragment.resources,
            blend_enabled: request.descriptor.blends.iter().map(|b| b.enable).collect(),
            depth_test: request.descriptor.depth.enable,
            topology: request.descriptor.primitive,
            cull: request.descriptor.cull,
            sample_count: request.sample_count,
            color_formats: request.color_formats.to_vec(),
        });
        self.pipelines.lock().push(Arc::downgrade(&pipeline));
        Ok(pipeline)
    }
}

/// A temp directory holding a descriptor and its two shaders.
pub struct Fixture {
    pub dir: TempDir,
    pub log: ReloadLog,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_descriptor(DEFAULT_DESCRIPTOR)
    }

    pub fn with_descriptor(descriptor: &str) -> Self {
        let fixture = Self {
            dir: tempfile::tempdir().unwrap(),
            log: ReloadLog::new(),
        };
        fixture.write("triangle.vert", TRIANGLE_VERT);
        fixture.write("triangle.frag", TRIANGLE_FRAG);
        fixture.write("triangle.json", descriptor);
        fixture
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) {
        std::fs::write(self.path(name), content).unwrap();
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.path("triangle.json")
    }

    /// Builder with fast polling and short stable reads.
    pub fn builder(&self) -> ReloadCoordinatorBuilder {
        ReloadCoordinatorBuilder::new(self.descriptor_path())
            .poll_interval_ms(0)
            .stable_read_delay_ms(1)
            .stable_read_attempts(3)
            .diagnostics(Arc::new(self.log.clone()))
    }

    pub fn coordinator(&self, backend: RecordingBackend) -> ReloadCoordinator<RecordingBackend> {
        self.builder().build(backend).unwrap()
    }
}
