use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use deepsight_client::{Buffer, Session};
use deepsight_core::{Result, SampleName, StreamName, ToolKind, ToolName, WorkspaceName};
use deepsight_runtime::{process_across_devices, FanoutConfig, RuntimeWorkspace};
use deepsight_sim::WorkspaceManifest;
use deepsight_training::TrainingWorkspace;

#[derive(Parser)]
#[command(
    name = "deepsight",
    about = "deepsight — client for a deep-learning machine-vision runtime"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a session config file (JSON).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Compute devices to use (comma-separated ordinals; empty = library default).
    #[arg(long, global = true)]
    pub devices: Option<String>,

    /// GPU mode override.
    #[arg(long, global = true, value_enum)]
    pub gpu_mode: Option<GpuModeArg>,

    /// Route the runtime's own debug output to this file instead of the console.
    #[arg(long, global = true)]
    pub debug_log: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum GpuModeArg {
    /// CPU only.
    None,
    /// One device per tool (throughput).
    Single,
    /// Several devices per tool (latency).
    Multiple,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum ToolKindArg {
    Red,
    Blue,
    Green,
}

impl From<ToolKindArg> for ToolKind {
    fn from(kind: ToolKindArg) -> Self {
        match kind {
            ToolKindArg::Red => ToolKind::Red,
            ToolKindArg::Blue => ToolKind::Blue,
            ToolKindArg::Green => ToolKind::Green,
        }
    }
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Xml,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print runtime version, license, and compute devices.
    Info,
    /// Process one image through a workspace and write the result.
    Process {
        /// Workspace archive path.
        #[arg(required = true)]
        workspace: PathBuf,
        /// Input image (PNG/BMP/TIFF).
        #[arg(required = true)]
        image: PathBuf,
        /// Stream to process under.
        #[arg(long, default_value = "default")]
        stream: String,
        /// Tool to run; defaults to the last tool of the chain.
        #[arg(long)]
        tool: Option<String>,
        /// Result file for XML output.
        #[arg(long, default_value = "result.xml")]
        output: PathBuf,
        /// Output format. JSON prints to stdout instead of a file.
        #[arg(long, default_value = "xml", value_enum)]
        format: OutputFormat,
    },
    /// Process an image repeatedly across all devices and report timing.
    Bench {
        /// Workspace archive path.
        #[arg(required = true)]
        workspace: PathBuf,
        /// Input image (PNG/BMP/TIFF).
        #[arg(required = true)]
        image: PathBuf,
        /// Total sample count, split across devices.
        #[arg(long, default_value = "50")]
        iterations: usize,
        /// Stream to process under.
        #[arg(long, default_value = "default")]
        stream: String,
        /// Tool to run; defaults to the last tool of the chain.
        #[arg(long)]
        tool: Option<String>,
    },
    /// Create and train a workspace from an image directory, then export a
    /// runtime archive.
    Train {
        /// Directory of training images.
        #[arg(required = true)]
        images: PathBuf,
        /// Directory to create the workspace in (must be empty or absent).
        #[arg(long, default_value = "ws/textile")]
        workspace_dir: PathBuf,
        /// Runtime archive to export.
        #[arg(long, default_value = "textile.vrws")]
        output: PathBuf,
        /// Images whose name contains this substring are labeled Bad.
        #[arg(long, default_value = "bad")]
        bad_marker: String,
        /// Override sampling/feature_size (e.g. 150x150).
        #[arg(long)]
        feature_size: Option<String>,
        /// Override training/count_epochs.
        #[arg(long)]
        epochs: Option<u32>,
        /// Stream name.
        #[arg(long, default_value = "default")]
        stream: String,
        /// Tool name.
        #[arg(long, default_value = "analyze")]
        tool: String,
        /// Tool kind.
        #[arg(long, default_value = "red", value_enum)]
        kind: ToolKindArg,
    },
    /// Write a simulated workspace archive (development aid).
    MakeWorkspace {
        /// Archive path to write.
        #[arg(required = true)]
        output: PathBuf,
        #[arg(long, default_value = "default")]
        stream: String,
        #[arg(long, default_value = "analyze")]
        tool: String,
        #[arg(long, default_value = "red", value_enum)]
        kind: ToolKindArg,
    },
}

/// Pick the tool to run: the caller's choice, or the last tool of the
/// chain (which processes every predecessor as well).
fn select_tool(
    workspace: &RuntimeWorkspace<'_>,
    stream: &StreamName,
    requested: Option<&str>,
) -> Result<ToolName> {
    match requested {
        Some(tool) => ToolName::new(tool),
        None => {
            let mut tools = workspace.tools(stream)?;
            tools.pop().ok_or_else(|| {
                deepsight_core::VisionError::ResourceNotFound(format!(
                    "stream '{stream}' has no tools"
                ))
            })
        }
    }
}

pub fn print_info(session: &Session) -> Result<()> {
    let mut buf = Buffer::new();
    session.version(&mut buf)?;
    println!("{}", buf.as_text());

    session.license_info(&mut buf)?;
    println!("{}", buf.as_text());

    let devices = session.compute_devices()?;
    if devices.is_empty() {
        println!("no compute devices available");
    }
    for device in devices {
        println!("  [{}] {}", device.index, device.name);
    }
    Ok(())
}

pub fn run_process(
    session: &Session,
    workspace_path: &Path,
    image_path: &Path,
    stream: &str,
    tool: Option<&str>,
    output: &Path,
    format: OutputFormat,
) -> Result<()> {
    let stream = StreamName::new(stream)?;
    let workspace = RuntimeWorkspace::open_from_file(
        session,
        WorkspaceName::new("workspace")?,
        workspace_path,
    )?;
    let tool = select_tool(&workspace, &stream, tool)?;

    let image = session.load_image(image_path)?;
    let mut sample = workspace.create_sample(&stream, SampleName::new("my_sample")?)?;
    sample.attach_image(&image)?;
    sample.process(&tool, "")?;

    match format {
        OutputFormat::Xml => {
            let mut result = Buffer::new();
            sample.read_result(&mut result)?;
            result.write_to(output)?;
            tracing::info!(output = %output.display(), "result written");
        }
        OutputFormat::Json => {
            let result = sample.result()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&result)
                    .map_err(|e| deepsight_core::VisionError::MalformedResponse(e.to_string()))?
            );
        }
    }

    sample.free()?;
    image.release()?;
    workspace.close()
}

pub fn run_bench(
    session: &Session,
    workspace_path: &Path,
    image_path: &Path,
    iterations: usize,
    stream: &str,
    tool: Option<&str>,
) -> Result<()> {
    let stream = StreamName::new(stream)?;
    let workspace = RuntimeWorkspace::open_from_file(
        session,
        WorkspaceName::new("workspace")?,
        workspace_path,
    )?;
    let tool = select_tool(&workspace, &stream, tool)?;
    let image = session.load_image(image_path)?;
    let devices = session.compute_devices()?;

    let config = FanoutConfig::new(iterations, stream, tool);
    let report = process_across_devices(&workspace, &image, &devices, &config)?;

    println!(
        "processed {} samples on {} devices in {} ms (average: {:.2} ms)",
        report.iterations,
        report.workers.len(),
        report.elapsed.as_millis(),
        report.average().as_secs_f64() * 1000.0
    );
    for worker in &report.workers {
        println!(
            "  [{}] {}: {} samples in {} ms",
            worker.device.index,
            worker.device.name,
            worker.iterations,
            worker.elapsed.as_millis()
        );
    }

    image.release()?;
    workspace.close()
}

#[allow(clippy::too_many_arguments)]
pub fn run_train(
    session: &Session,
    images: &Path,
    workspace_dir: &Path,
    output: &Path,
    bad_marker: &str,
    feature_size: Option<&str>,
    epochs: Option<u32>,
    stream: &str,
    tool: &str,
    kind: ToolKind,
) -> Result<()> {
    let stream = StreamName::new(stream)?;
    let tool = ToolName::new(tool)?;
    let workspace =
        TrainingWorkspace::create(session, WorkspaceName::new("textile")?, workspace_dir)?;
    workspace.add_stream(&stream)?;
    workspace.add_tool(&stream, &tool, None, kind)?;

    let mut count = 0usize;
    let mut entries: Vec<_> = std::fs::read_dir(images)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    matches!(
                        ext.to_ascii_lowercase().as_str(),
                        "png" | "bmp" | "tif" | "tiff"
                    )
                })
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    for path in &entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let image = session.load_image(path)?;
        workspace.add_image_to_database(&stream, &image, &name)?;
        image.release()?;
        count += 1;
    }
    tracing::info!(count, "images added to the database");

    // Build views, then label the bad images by filename and the rest Good.
    workspace.process_database(&stream, &tool)?;
    workspace.wait(&stream, &tool, 0)?;
    workspace.label_views(&stream, &tool, &format!("'{bad_marker}'"), "Bad")?;
    workspace.label_views(&stream, &tool, "not labeled", "")?;

    if let Some(feature_size) = feature_size {
        let previous = workspace.get_parameter(&stream, &tool, "sampling/feature_size")?;
        tracing::info!(from = %previous, to = %feature_size, "setting feature size");
        workspace.set_parameter(&stream, &tool, "sampling/feature_size", feature_size)?;
    }
    if let Some(epochs) = epochs {
        workspace.set_parameter(&stream, &tool, "training/count_epochs", &epochs.to_string())?;
    }

    let status = workspace.train_blocking(&stream, &tool, 1000)?;
    println!("training done ({})", status.progress);

    workspace.export_runtime(output)?;
    println!("runtime workspace exported to '{}'", output.display());

    workspace.save()?;
    workspace.close(true)
}

pub fn make_workspace(output: &Path, stream: &str, tool: &str, kind: ToolKind) -> Result<()> {
    let manifest = WorkspaceManifest::single_tool(stream, tool, kind);
    manifest.write_to(output)?;
    println!("workspace archive written to '{}'", output.display());
    Ok(())
}
