//! End-to-end training scenarios against the simulated backend, modeled on
//! the textile tutorial: ingest a small image set, label the bad ones by
//! filename, tune sampling and epoch parameters, train, and export a
//! runtime archive.

use std::sync::Arc;

use deepsight_client::{Image, Session, SessionConfig};
use deepsight_core::{
    ImageDesc, PixelDepth, SampleName, StreamName, ToolKind, ToolName, VisionError, WorkspaceName,
};
use deepsight_runtime::RuntimeWorkspace;
use deepsight_sim::SimRuntime;
use deepsight_training::TrainingWorkspace;

fn test_image(seed: u8) -> Image {
    let desc = ImageDesc::packed(8, 8, 1, PixelDepth::U8);
    let pixels = (0..64).map(|i| (i as u8).wrapping_mul(seed)).collect();
    Image::from_raw(desc, pixels).unwrap()
}

fn names() -> (WorkspaceName, StreamName, ToolName) {
    (
        WorkspaceName::new("textile").unwrap(),
        StreamName::new("default").unwrap(),
        ToolName::new("analyze").unwrap(),
    )
}

#[test]
fn full_training_flow_exports_usable_runtime_archive() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open_training(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, stream, tool) = names();

    let workspace =
        TrainingWorkspace::create(&session, ws_name, dir.path().join("ws")).unwrap();
    workspace.add_stream(&stream).unwrap();
    workspace.add_tool(&stream, &tool, None, ToolKind::Red).unwrap();

    for (idx, name) in ["000000.png", "000001.png", "bad000001.png"].iter().enumerate() {
        let image = test_image(idx as u8 + 1);
        workspace
            .add_image_to_database(&stream, &image, name)
            .unwrap();
    }

    // Build views, then label the bad ones by filename and the rest Good.
    workspace.process_database(&stream, &tool).unwrap();
    workspace.wait(&stream, &tool, 0).unwrap();
    workspace.label_views(&stream, &tool, "'bad'", "Bad").unwrap();
    workspace.label_views(&stream, &tool, "not labeled", "").unwrap();

    // Tune the sampling and training parameters the tutorial touches.
    let feature_size = workspace
        .get_parameter(&stream, &tool, "sampling/feature_size")
        .unwrap();
    assert!(!feature_size.is_empty());
    workspace
        .set_parameter(&stream, &tool, "sampling/feature_size", "150x150")
        .unwrap();
    workspace
        .set_parameter(&stream, &tool, "training/count_epochs", "10")
        .unwrap();
    assert_eq!(
        workspace
            .get_parameter(&stream, &tool, "training/count_epochs")
            .unwrap(),
        "10"
    );

    let status = workspace.train_blocking(&stream, &tool, 1000).unwrap();
    assert!(status.ready);
    assert!(!status.busy);
    assert_eq!(status.error, None);

    // Export both archive forms, then save and close keeping the state.
    let runtime_archive = dir.path().join("textile.vrws");
    workspace.export(dir.path().join("textile.vwsa"), true).unwrap();
    workspace.export_runtime(&runtime_archive).unwrap();
    workspace.save().unwrap();
    workspace.close(true).unwrap();

    // The exported archive loads as a runtime workspace and processes a
    // sample through the trained tool.
    let runtime_name = WorkspaceName::new("workspace").unwrap();
    let runtime =
        RuntimeWorkspace::open_from_file(&session, runtime_name, &runtime_archive).unwrap();
    assert_eq!(runtime.tools(&stream).unwrap(), vec![tool.clone()]);

    let image = test_image(3);
    let mut sample = runtime
        .create_sample(&stream, SampleName::new("s1").unwrap())
        .unwrap();
    sample.attach_image(&image).unwrap();
    sample.process(&tool, "").unwrap();
    let result = sample.result().unwrap();
    assert_eq!(result.markings.len(), 1);
    sample.free().unwrap();
    runtime.close().unwrap();

    session.close().unwrap();
}

#[test]
fn training_requires_training_session() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::new());
    // Runtime-only session: no training interface.
    let session = Session::open(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, ..) = names();

    let err = TrainingWorkspace::create(&session, ws_name, dir.path().join("ws")).unwrap_err();
    assert!(matches!(err, VisionError::TrainingUnavailable), "{err}");
}

#[test]
fn train_blocking_surfaces_error_attribute() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open_training(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, stream, tool) = names();

    let workspace =
        TrainingWorkspace::create(&session, ws_name, dir.path().join("ws")).unwrap();
    workspace.add_stream(&stream).unwrap();
    workspace.add_tool(&stream, &tool, None, ToolKind::Red).unwrap();
    workspace
        .add_image_to_database(&stream, &test_image(1), "000000.png")
        .unwrap();

    // Training without processing the database first fails through the
    // status error attribute, not a lost result.
    let err = workspace.train_blocking(&stream, &tool, 1000).unwrap_err();
    match err {
        VisionError::Vendor { message, .. } => {
            assert!(message.contains("unprocessed"), "{message}");
        }
        other => panic!("expected vendor error, got {other}"),
    }
}

#[test]
fn create_rejects_occupied_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("occupied"), b"x").unwrap();
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open_training(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, ..) = names();

    let err = TrainingWorkspace::create(&session, ws_name.clone(), dir.path()).unwrap_err();
    assert!(matches!(err, VisionError::Vendor { .. }), "{err}");

    // The name was not leaked into the registry by the failed create.
    let workspace =
        TrainingWorkspace::create(&session, ws_name, dir.path().join("fresh")).unwrap();
    workspace.close(true).unwrap();
}

#[test]
fn export_runtime_requires_trained_chain() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open_training(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, stream, tool) = names();

    let workspace =
        TrainingWorkspace::create(&session, ws_name, dir.path().join("ws")).unwrap();
    workspace.add_stream(&stream).unwrap();
    workspace.add_tool(&stream, &tool, None, ToolKind::Red).unwrap();

    let err = workspace
        .export_runtime(dir.path().join("textile.vrws"))
        .unwrap_err();
    assert!(matches!(err, VisionError::InvalidState(_)), "{err}");
}
