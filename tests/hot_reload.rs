mod common;

use common::*;
use shader_pipeline_hotreload::descriptor::{CullMode, PrimitiveTopology};
use shader_pipeline_hotreload::{
    ReloadCoordinator, ReloadError, ReloadEvent, ReloadOutcome, SampleCountChange, ShaderStage,
    VertexFormat,
};
use std::sync::Arc;

#[test]
fn default_descriptor_builds_opaque_triangle_list() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(RecordingBackend::new());
    let pipeline = coordinator.pipeline();

    assert_eq!(pipeline.blend_enabled, vec![false]);
    assert!(!pipeline.depth_test);
    assert_eq!(pipeline.topology, PrimitiveTopology::TriangleList);
    assert_eq!(pipeline.cull, CullMode::None);
    assert_eq!(pipeline.sample_count, 1);
    assert_eq!(
        pipeline.color_formats,
        vec![vulkano::format::Format::B8G8R8A8_SRGB]
    );
}

#[test]
fn vertex_layout_is_reflected_and_packed() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(RecordingBackend::new());
    let program = coordinator.program();

    let layout: Vec<_> = program
        .vertex_input()
        .attributes
        .iter()
        .map(|a| (a.location, a.format, a.offset))
        .collect();
    assert_eq!(
        layout,
        vec![
            (0, VertexFormat::Float2, 0),
            (1, VertexFormat::Float, 8),
            (2, VertexFormat::Float3, 12),
        ]
    );
    assert_eq!(program.vertex_stride(), 24);
    assert_eq!(coordinator.pipeline().vertex_input, *program.vertex_input());
    assert_eq!(program.fragment_resources().uniform_buffers, 1);
    assert_eq!(program.push_constant_size(), 0);
    assert_eq!(program.tracked_files().len(), 3);
}

#[test]
fn identical_inputs_build_identical_programs() {
    let fixture = Fixture::new();
    let first = fixture.coordinator(RecordingBackend::new());
    let second = fixture.coordinator(RecordingBackend::new());

    assert_eq!(first.program().vertex_input(), second.program().vertex_input());
    assert_eq!(
        first.program().vertex_resources(),
        second.program().vertex_resources()
    );
    assert_eq!(
        first.program().fragment_resources(),
        second.program().fragment_resources()
    );
    assert_eq!(
        first.program().stage(ShaderStage::Fragment).compiled.words,
        second.program().stage(ShaderStage::Fragment).compiled.words
    );
}

#[test]
fn untouched_sources_never_rebuild() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());

    for _ in 0..5 {
        assert!(matches!(coordinator.tick(), ReloadOutcome::Unchanged));
    }
    // Rewriting identical bytes is not a change either.
    fixture.write("triangle.frag", TRIANGLE_FRAG);
    assert!(matches!(coordinator.tick(), ReloadOutcome::Unchanged));
    assert_eq!(coordinator.backend().created(), 1);
}

#[test]
fn broken_fragment_keeps_the_live_pipeline() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());
    let before = Arc::clone(coordinator.pipeline());
    let layout_before = coordinator.program().vertex_input().clone();
    let resources_before = *coordinator.program().fragment_resources();

    fixture.write("triangle.frag", BROKEN_FRAG);
    match coordinator.tick() {
        ReloadOutcome::Failed(ReloadError::Compile { stage, diagnostic }) => {
            assert_eq!(stage, ShaderStage::Fragment);
            assert!(diagnostic.contains("triangle.frag"), "{diagnostic}");
        }
        other => panic!("expected a compile failure, got {other:?}"),
    }

    assert!(Arc::ptr_eq(&before, coordinator.pipeline()));
    assert_eq!(*coordinator.program().vertex_input(), layout_before);
    assert_eq!(*coordinator.program().fragment_resources(), resources_before);
    assert_eq!(fixture.log.failure_count(), 1);

    // The same broken content is not retried.
    assert!(matches!(coordinator.tick(), ReloadOutcome::Unchanged));
    assert_eq!(fixture.log.failure_count(), 1);
}

#[test]
fn fixed_source_swaps_and_releases_the_old_pipeline() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());
    let first_id = coordinator.pipeline().id;

    fixture.write("triangle.frag", BROKEN_FRAG);
    assert!(matches!(coordinator.tick(), ReloadOutcome::Failed(_)));

    fixture.write("triangle.frag", DIMMED_FRAG);
    assert!(matches!(coordinator.tick(), ReloadOutcome::Reloaded));
    assert_ne!(coordinator.pipeline().id, first_id);
    assert_eq!(coordinator.backend().created(), 2);
    assert_eq!(coordinator.backend().alive(), 1);

    let events = fixture.log.snapshot();
    assert!(matches!(events.last(), Some(ReloadEvent::Swapped { .. })));
    assert_eq!(fixture.log.failure_count(), 1);

    // Restoring the first version still differs from the live program.
    fixture.write("triangle.frag", TRIANGLE_FRAG);
    assert!(matches!(coordinator.tick(), ReloadOutcome::Reloaded));
    assert_eq!(coordinator.backend().alive(), 1);
}

#[test]
fn backend_rejection_is_recovered() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());
    let before = Arc::clone(coordinator.pipeline());

    coordinator.backend().reject_next();
    fixture.write("triangle.frag", DIMMED_FRAG);
    assert!(matches!(
        coordinator.tick(),
        ReloadOutcome::Failed(ReloadError::PipelineCreateFailed(_))
    ));
    assert!(Arc::ptr_eq(&before, coordinator.pipeline()));

    // A forced reload bypasses the rejected-content check.
    coordinator.reload().unwrap();
    assert!(!Arc::ptr_eq(&before, coordinator.pipeline()));
}

#[test]
fn descriptor_edits_trigger_rebuilds() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());

    fixture.write(
        "triangle.json",
        r#"{
            "vertex_shader": "triangle.vert",
            "fragment_shader": "triangle.frag",
            "primitive": "triangle_strip",
            "cull": "back",
            "depth": { "enable": true, "write": true, "compare": "less" },
            "blend": [{ "enable": true, "src_color": "src_alpha", "dst_color": "one_minus_src_alpha" }]
        }"#,
    );
    assert!(matches!(coordinator.tick(), ReloadOutcome::Reloaded));

    let pipeline = coordinator.pipeline();
    assert_eq!(pipeline.topology, PrimitiveTopology::TriangleStrip);
    assert_eq!(pipeline.cull, CullMode::Back);
    assert!(pipeline.depth_test);
    assert_eq!(pipeline.blend_enabled, vec![true]);
}

#[test]
fn malformed_descriptor_edit_is_reported_not_applied() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());

    fixture.write(
        "triangle.json",
        r#"{ "vertex_shader": "triangle.vert", "fragment_shader": "triangle.frag", "cull": "sideways" }"#,
    );
    assert!(matches!(
        coordinator.tick(),
        ReloadOutcome::Failed(ReloadError::ConfigParse { .. })
    ));
    assert_eq!(coordinator.pipeline().cull, CullMode::None);
}

#[test]
fn unsupported_sample_count_is_negotiated_and_signalled_once() {
    let fixture = Fixture::with_descriptor(
        r#"{ "vertex_shader": "triangle.vert", "fragment_shader": "triangle.frag", "msaa": { "sample_count": 8 } }"#,
    );
    let mut coordinator = fixture
        .builder()
        .active_sample_count(1)
        .build(RecordingBackend::supporting(&[1, 2, 4]))
        .unwrap();

    assert_eq!(coordinator.program().sample_count(), 4);
    assert_eq!(coordinator.pipeline().sample_count, 4);
    assert_eq!(
        coordinator.take_sample_count_change(),
        Some(SampleCountChange {
            previous: 1,
            current: 4
        })
    );
    assert_eq!(coordinator.take_sample_count_change(), None);
    assert_eq!(coordinator.active_sample_count(), 4);

    // Rebuilding at the same negotiated count does not signal again.
    fixture.write("triangle.frag", DIMMED_FRAG);
    assert!(matches!(coordinator.tick(), ReloadOutcome::Reloaded));
    assert_eq!(coordinator.take_sample_count_change(), None);

    let signals = fixture
        .log
        .snapshot()
        .into_iter()
        .filter(|e| matches!(e, ReloadEvent::SampleCountChanged(_)))
        .count();
    assert_eq!(signals, 1);
}

#[test]
fn startup_errors_are_returned() {
    let fixture = Fixture::new();
    std::fs::remove_file(fixture.descriptor_path()).unwrap();
    assert!(matches!(
        fixture.builder().build(RecordingBackend::new()),
        Err(ReloadError::ConfigNotFound { .. })
    ));

    let fixture = Fixture::new();
    std::fs::remove_file(fixture.path("triangle.vert")).unwrap();
    assert!(matches!(
        fixture.builder().build(RecordingBackend::new()),
        Err(ReloadError::NotFound { .. })
    ));

    let fixture = Fixture::new();
    fixture.write("triangle.frag", "");
    assert!(matches!(
        fixture.builder().build(RecordingBackend::new()),
        Err(ReloadError::EmptyContent { .. })
    ));
    assert_eq!(fixture.log.failure_count(), 1);
}

#[test]
fn descriptor_naming_a_missing_shader_lands_once_it_exists() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());

    fixture.write(
        "triangle.json",
        r#"{ "vertex_shader": "triangle.vert", "fragment_shader": "dimmed.frag" }"#,
    );
    match coordinator.tick() {
        ReloadOutcome::Failed(ReloadError::NotFound { path }) => {
            assert!(path.ends_with("dimmed.frag"), "{}", path.display());
        }
        other => panic!("expected a missing shader, got {other:?}"),
    }

    // Still missing: not retried, not logged again.
    assert!(matches!(coordinator.tick(), ReloadOutcome::Unchanged));
    assert_eq!(fixture.log.failure_count(), 1);

    fixture.write("dimmed.frag", DIMMED_FRAG);
    assert!(matches!(coordinator.tick(), ReloadOutcome::Reloaded));
    assert!(
        coordinator
            .program()
            .stage(ShaderStage::Fragment)
            .file
            .path
            .ends_with("dimmed.frag")
    );
    assert_eq!(coordinator.backend().alive(), 1);
}

#[test]
fn fixing_a_newly_named_shader_is_picked_up() {
    let fixture = Fixture::new();
    let mut coordinator = fixture.coordinator(RecordingBackend::new());

    fixture.write("dimmed.frag", BROKEN_FRAG);
    fixture.write(
        "triangle.json",
        r#"{ "vertex_shader": "triangle.vert", "fragment_shader": "dimmed.frag" }"#,
    );
    assert!(matches!(
        coordinator.tick(),
        ReloadOutcome::Failed(ReloadError::Compile { .. })
    ));
    assert!(matches!(coordinator.tick(), ReloadOutcome::Unchanged));

    // The live program does not track dimmed.frag, yet the fix still lands.
    fixture.write("dimmed.frag", DIMMED_FRAG);
    assert!(matches!(coordinator.tick(), ReloadOutcome::Reloaded));
    assert_eq!(fixture.log.failure_count(), 1);
}

#[test]
fn coordinator_builder_accepts_any_backend() {
    let fixture = Fixture::new();
    let coordinator = ReloadCoordinator::builder(fixture.descriptor_path())
        .poll_interval_ms(0)
        .build(RecordingBackend::new())
        .unwrap();
    assert_eq!(coordinator.descriptor_path(), fixture.descriptor_path().as_path());
    assert_eq!(coordinator.backend().created(), 1);
}
