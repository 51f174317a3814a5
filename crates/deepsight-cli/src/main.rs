use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use deepsight_client::{Session, SessionConfig};
use deepsight_core::{DebugSink, GpuMode};
use deepsight_sim::SimRuntime;

mod cli;

use cli::{Cli, Command, GpuModeArg};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!("deepsight v{}", env!("CARGO_PKG_VERSION"));

    // Load or create the session config.
    let mut config = if let Some(config_path) = &cli.config {
        let data = std::fs::read_to_string(config_path)?;
        serde_json::from_str::<SessionConfig>(&data)?
    } else {
        SessionConfig::default()
    };

    // Apply CLI overrides.
    if let Some(devices) = &cli.devices {
        config.devices = devices.parse()?;
    }
    if let Some(mode) = cli.gpu_mode {
        config.gpu_mode = match mode {
            GpuModeArg::None => GpuMode::NoGpu,
            GpuModeArg::Single => GpuMode::SingleDevicePerTool,
            GpuModeArg::Multiple => GpuMode::MultipleDevicesPerTool,
        };
    }
    if let Some(path) = &cli.debug_log {
        config.debug_sink = DebugSink::File(path.clone());
    }

    match cli.command {
        Command::Info => {
            let session = Session::open(Arc::new(SimRuntime::new()), &config)?;
            cli::print_info(&session)?;
            session.close()?;
        }
        Command::Process {
            workspace,
            image,
            stream,
            tool,
            output,
            format,
        } => {
            let session = Session::open(Arc::new(SimRuntime::new()), &config)?;
            cli::run_process(
                &session,
                &workspace,
                &image,
                &stream,
                tool.as_deref(),
                &output,
                format,
            )?;
            session.close()?;
        }
        Command::Bench {
            workspace,
            image,
            iterations,
            stream,
            tool,
        } => {
            let session = Session::open(Arc::new(SimRuntime::new()), &config)?;
            cli::run_bench(&session, &workspace, &image, iterations, &stream, tool.as_deref())?;
            session.close()?;
        }
        Command::Train {
            images,
            workspace_dir,
            output,
            bad_marker,
            feature_size,
            epochs,
            stream,
            tool,
            kind,
        } => {
            let session = Session::open_training(Arc::new(SimRuntime::new()), &config)?;
            cli::run_train(
                &session,
                &images,
                &workspace_dir,
                &output,
                &bad_marker,
                feature_size.as_deref(),
                epochs,
                &stream,
                &tool,
                kind.into(),
            )?;
            session.close()?;
        }
        Command::MakeWorkspace {
            output,
            stream,
            tool,
            kind,
        } => {
            cli::make_workspace(&output, &stream, &tool, kind.into())?;
        }
    }

    Ok(())
}
