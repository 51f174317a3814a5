//! Sample-processing benchmarks over the simulated runtime.
//!
//! Run with: cargo bench --bench pipeline_bench
//!
//! The simulated backend replaces GPU inference with a deterministic
//! pixel hash, so these numbers measure the client's own overhead:
//! sample bookkeeping, XML result generation/parsing, and lock traffic.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use deepsight_client::{Image, Session, SessionConfig};
use deepsight_core::{ImageDesc, PixelDepth, SampleName, StreamName, ToolKind, ToolName};
use deepsight_runtime::RuntimeWorkspace;
use deepsight_sim::{SimRuntime, WorkspaceManifest};

fn bench_sample_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_loop");

    for &(width, height) in &[(64u32, 64u32), (256, 256), (1024, 1024)] {
        group.bench_with_input(
            BenchmarkId::new("create+attach+process+free", format!("{width}x{height}")),
            &(width, height),
            |b, &(w, h)| {
                let dir = tempfile::tempdir().unwrap();
                let archive = dir.path().join("bench.vrws");
                WorkspaceManifest::single_tool("default", "analyze", ToolKind::Red)
                    .write_to(&archive)
                    .unwrap();

                let session =
                    Session::open(Arc::new(SimRuntime::new()), &SessionConfig::cpu_only())
                        .unwrap();
                let workspace = RuntimeWorkspace::open_from_file(
                    &session,
                    "workspace".parse().unwrap(),
                    &archive,
                )
                .unwrap();

                let stream: StreamName = "default".parse().unwrap();
                let tool: ToolName = "analyze".parse().unwrap();
                let desc = ImageDesc::packed(w, h, 1, PixelDepth::U8);
                let image = Image::from_raw(desc, vec![128u8; desc.data_len()]).unwrap();

                b.iter(|| {
                    let name: SampleName = "bench".parse().unwrap();
                    let mut sample = workspace.create_sample(&stream, name).unwrap();
                    sample.attach_image(&image).unwrap();
                    sample.process(&tool, "").unwrap();
                    sample.free().unwrap();
                });

                workspace.close().unwrap();
                session.close().unwrap();
            },
        );
    }

    group.finish();
}

fn bench_result_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("bench.vrws");
    WorkspaceManifest::single_tool("default", "analyze", ToolKind::Red)
        .write_to(&archive)
        .unwrap();

    let session =
        Session::open(Arc::new(SimRuntime::new()), &SessionConfig::cpu_only()).unwrap();
    let workspace =
        RuntimeWorkspace::open_from_file(&session, "workspace".parse().unwrap(), &archive)
            .unwrap();

    let stream: StreamName = "default".parse().unwrap();
    let tool: ToolName = "analyze".parse().unwrap();
    let desc = ImageDesc::packed(64, 64, 1, PixelDepth::U8);
    let image = Image::from_raw(desc, vec![128u8; desc.data_len()]).unwrap();

    let mut sample = workspace
        .create_sample(&stream, "bench".parse().unwrap())
        .unwrap();
    sample.attach_image(&image).unwrap();
    sample.process(&tool, "").unwrap();

    c.bench_function("read_and_parse_result", |b| {
        b.iter(|| {
            let result = sample.result().unwrap();
            std::hint::black_box(result);
        });
    });

    sample.free().unwrap();
    workspace.close().unwrap();
    session.close().unwrap();
}

criterion_group!(benches, bench_sample_loop, bench_result_read);
criterion_main!(benches);
