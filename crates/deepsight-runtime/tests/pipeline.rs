//! End-to-end runtime scenarios against the simulated backend.

use std::sync::Arc;

use deepsight_client::{Buffer, Image, Session, SessionConfig};
use deepsight_core::{
    DeviceSelector, GpuMode, ImageDesc, PixelDepth, SampleName, StreamName, ToolKind, ToolName,
    VisionError, WorkspaceName,
};
use deepsight_runtime::{process_across_devices, FanoutConfig, RuntimeWorkspace};
use deepsight_sim::{SimRuntime, WorkspaceManifest};

fn archive(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("textile.vrws");
    WorkspaceManifest::single_tool("default", "analyze", ToolKind::Red)
        .write_to(&path)
        .unwrap();
    path
}

fn test_image() -> Image {
    let desc = ImageDesc::packed(8, 8, 1, PixelDepth::U8);
    let pixels = (0..64).map(|i| i as u8).collect();
    Image::from_raw(desc, pixels).unwrap()
}

fn names() -> (WorkspaceName, StreamName, ToolName) {
    (
        WorkspaceName::new("workspace").unwrap(),
        StreamName::new("default").unwrap(),
        ToolName::new("analyze").unwrap(),
    )
}

#[test]
fn missing_archive_leaves_session_usable() {
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, ..) = names();

    let err = RuntimeWorkspace::open_from_file(&session, ws_name, "/no/such/archive.vrws")
        .unwrap_err();
    assert!(matches!(err, VisionError::ResourceNotFound(_)), "{err}");

    // The failure did not poison the session.
    let mut buf = Buffer::new();
    session.version(&mut buf).unwrap();
    assert!(!buf.is_empty());
    session.close().unwrap();
}

#[test]
fn sample_loop_reads_results_and_overwrites_on_reprocess() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, stream, tool) = names();

    let workspace =
        RuntimeWorkspace::open_from_file(&session, ws_name, archive(dir.path())).unwrap();
    assert_eq!(workspace.streams().unwrap(), vec![stream.clone()]);
    assert_eq!(workspace.tools(&stream).unwrap(), vec![tool.clone()]);

    let image = test_image();
    let mut sample = workspace
        .create_sample(&stream, SampleName::new("s1").unwrap())
        .unwrap();
    sample.attach_image(&image).unwrap();
    sample.process(&tool, "").unwrap();

    let mut buf = Buffer::new();
    sample.read_result(&mut buf).unwrap();
    assert!(!buf.is_empty());
    assert!(buf.as_text().starts_with("<sample"), "{}", buf.as_text());

    let first = sample.result().unwrap();
    assert_eq!(first.markings.len(), 1);
    let score = first.marking("analyze").unwrap().score;

    // Re-running the same tool overwrites its result instead of appending.
    sample.process(&tool, "").unwrap();
    let second = sample.result().unwrap();
    assert_eq!(second.markings.len(), 1);
    assert_eq!(second.marking("analyze").unwrap().score, score);

    sample.free().unwrap();

    // The name is reusable once freed.
    let again = workspace
        .create_sample(&stream, SampleName::new("s1").unwrap())
        .unwrap();
    again.free().unwrap();

    workspace.close().unwrap();
    session.close().unwrap();
}

#[test]
fn sample_rejects_out_of_sequence_calls() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, stream, tool) = names();

    let workspace =
        RuntimeWorkspace::open_from_file(&session, ws_name, archive(dir.path())).unwrap();
    let image = test_image();

    let mut sample = workspace
        .create_sample(&stream, SampleName::new("s1").unwrap())
        .unwrap();

    // Process before attach.
    let err = sample.process(&tool, "").unwrap_err();
    assert!(matches!(err, VisionError::InvalidState(_)), "{err}");

    // Read before process.
    let mut buf = Buffer::new();
    let err = sample.read_result(&mut buf).unwrap_err();
    assert!(matches!(err, VisionError::InvalidState(_)), "{err}");

    // Second attach.
    sample.attach_image(&image).unwrap();
    let err = sample.attach_image(&image).unwrap_err();
    assert!(matches!(err, VisionError::InvalidState(_)), "{err}");

    sample.free().unwrap();
}

#[test]
fn double_open_same_name_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::new());
    let session = Session::open(sim, &SessionConfig::cpu_only()).unwrap();
    let (ws_name, ..) = names();
    let path = archive(dir.path());

    let workspace = RuntimeWorkspace::open_from_file(&session, ws_name.clone(), &path).unwrap();
    let err = RuntimeWorkspace::open_from_file(&session, ws_name.clone(), &path).unwrap_err();
    assert!(matches!(err, VisionError::InvalidState(_)), "{err}");

    // Closing releases the name for reuse.
    workspace.close().unwrap();
    let workspace = RuntimeWorkspace::open_from_file(&session, ws_name, &path).unwrap();
    workspace.close().unwrap();
}

#[test]
fn fanout_splits_iterations_across_devices() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::with_devices(4));
    let session = Session::open(
        sim,
        &SessionConfig::throughput(DeviceSelector::list(["0", "1", "2", "3"])),
    )
    .unwrap();
    let (ws_name, stream, tool) = names();

    let devices = session.compute_devices().unwrap();
    assert_eq!(devices.len(), 4);

    let workspace =
        RuntimeWorkspace::open_from_file(&session, ws_name, archive(dir.path())).unwrap();
    let image = test_image();

    let config = FanoutConfig::new(50, stream, tool);
    let report = process_across_devices(&workspace, &image, &devices, &config).unwrap();

    assert_eq!(report.iterations, 50);
    assert_eq!(report.workers.len(), 4);
    let mut shares: Vec<usize> = report.workers.iter().map(|w| w.iterations).collect();
    assert_eq!(shares.iter().sum::<usize>(), 50);
    shares.sort_unstable();
    assert_eq!(shares, vec![12, 12, 13, 13]);

    workspace.close().unwrap();
    session.close().unwrap();
}

#[test]
fn fanout_propagates_worker_errors() {
    let dir = tempfile::tempdir().unwrap();
    let sim = Arc::new(SimRuntime::with_devices(2));
    let session = Session::open(
        sim,
        &SessionConfig::throughput(DeviceSelector::auto()),
    )
    .unwrap();
    let (ws_name, stream, _) = names();

    let devices = session.compute_devices().unwrap();
    let workspace =
        RuntimeWorkspace::open_from_file(&session, ws_name, archive(dir.path())).unwrap();
    let image = test_image();

    // No such tool in the chain: every worker fails on its first sample.
    let config = FanoutConfig::new(10, stream, ToolName::new("missing").unwrap());
    let err = process_across_devices(&workspace, &image, &devices, &config).unwrap_err();
    match err {
        VisionError::PartialFailure { failed, total, first } => {
            assert_eq!(failed, 2);
            assert_eq!(total, 2);
            assert!(first.contains("missing"), "{first}");
        }
        other => panic!("expected PartialFailure, got {other}"),
    }
}

#[test]
fn gpu_mode_is_configurable() {
    // Multi-device-per-tool minimizes latency; the session carries the
    // mode through initialization unchanged.
    let sim = Arc::new(SimRuntime::with_devices(2));
    let config = SessionConfig::low_latency(DeviceSelector::list(["0", "1"]));
    assert_eq!(config.gpu_mode, GpuMode::MultipleDevicesPerTool);
    let session = Session::open(sim.clone(), &config).unwrap();
    assert!(sim.is_initialized());
    session.close().unwrap();
    assert!(!sim.is_initialized());
}
