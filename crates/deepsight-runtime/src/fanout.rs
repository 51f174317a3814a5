use std::time::{Duration, Instant};

use deepsight_client::Image;
use deepsight_core::{ComputeDevice, Result, SampleName, StreamName, ToolName, VisionError};

use crate::workspace::RuntimeWorkspace;

/// Configuration for a multi-device processing run.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Total sample count, split across the selected devices.
    pub iterations: usize,
    pub stream: StreamName,
    pub tool: ToolName,
    /// Prefix for per-worker sample names; the device index is appended so
    /// no two workers ever share a name.
    pub sample_prefix: String,
}

impl FanoutConfig {
    pub fn new(iterations: usize, stream: StreamName, tool: ToolName) -> Self {
        Self {
            iterations,
            stream,
            tool,
            sample_prefix: "sample".to_string(),
        }
    }
}

/// Aggregate outcome of a fan-out run, available once every worker joined.
#[derive(Debug, Clone)]
pub struct FanoutReport {
    pub elapsed: Duration,
    pub iterations: usize,
    pub workers: Vec<WorkerReport>,
}

impl FanoutReport {
    /// Mean wall-clock time per sample across the whole run.
    pub fn average(&self) -> Duration {
        if self.iterations == 0 {
            Duration::ZERO
        } else {
            self.elapsed / self.iterations as u32
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub device: ComputeDevice,
    pub iterations: usize,
    pub elapsed: Duration,
}

/// Process `config.iterations` samples of `image` across one worker per
/// device.
///
/// Each worker owns a disjoint share of the iteration count (sizes differ
/// by at most one and sum to the total) and loops create → attach →
/// process → free under a worker-distinct sample name. Workers share only
/// the open workspace and the loaded image, both read-only here. All
/// workers join before the report is produced; a worker's first error is
/// carried to the join point and any failure surfaces as
/// [`VisionError::PartialFailure`] instead of being swallowed.
///
/// Callers running their own concurrent work against the same workspace
/// must keep sample names disjoint from `config.sample_prefix`: the vendor
/// contract leaves colliding names across threads undefined.
pub fn process_across_devices(
    workspace: &RuntimeWorkspace<'_>,
    image: &Image,
    devices: &[ComputeDevice],
    config: &FanoutConfig,
) -> Result<FanoutReport> {
    if devices.is_empty() {
        return Err(VisionError::InvalidState(
            "no compute devices selected for fan-out".to_string(),
        ));
    }

    let shares = partition(config.iterations, devices.len());
    let started = Instant::now();

    let outcomes: Vec<Result<WorkerReport>> = std::thread::scope(|scope| {
        let handles: Vec<_> = devices
            .iter()
            .zip(&shares)
            .map(|(device, &share)| {
                scope.spawn(move || run_worker(workspace, image, device, share, config))
            })
            .collect();
        handles
            .into_iter()
            .zip(devices)
            .map(|(handle, device)| {
                handle.join().unwrap_or_else(|_| {
                    Err(VisionError::InvalidState(format!(
                        "worker for device {} panicked",
                        device.index
                    )))
                })
            })
            .collect()
    });
    let elapsed = started.elapsed();

    let total = outcomes.len();
    let mut workers = Vec::with_capacity(total);
    let mut first_error = None;
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(report) => workers.push(report),
            Err(err) => {
                failed += 1;
                if first_error.is_none() {
                    first_error = Some(err.to_string());
                }
            }
        }
    }

    if let Some(first) = first_error {
        return Err(VisionError::PartialFailure {
            failed,
            total,
            first,
        });
    }

    tracing::info!(
        iterations = config.iterations,
        devices = total,
        elapsed_ms = elapsed.as_millis() as u64,
        "fan-out complete"
    );

    Ok(FanoutReport {
        elapsed,
        iterations: config.iterations,
        workers,
    })
}

fn run_worker(
    workspace: &RuntimeWorkspace<'_>,
    image: &Image,
    device: &ComputeDevice,
    share: usize,
    config: &FanoutConfig,
) -> Result<WorkerReport> {
    let name = SampleName::new(format!("{}-{}", config.sample_prefix, device.index))?;
    let started = Instant::now();
    for _ in 0..share {
        let mut sample = workspace.create_sample(&config.stream, name.clone())?;
        sample.attach_image(image)?;
        sample.process(&config.tool, "")?;
        sample.free()?;
    }
    let elapsed = started.elapsed();
    tracing::debug!(
        device = device.index,
        iterations = share,
        elapsed_ms = elapsed.as_millis() as u64,
        "worker finished"
    );
    Ok(WorkerReport {
        device: device.clone(),
        iterations: share,
        elapsed,
    })
}

/// Split `total` iterations into `workers` shares differing by at most
/// one.
fn partition(total: usize, workers: usize) -> Vec<usize> {
    let base = total / workers;
    let extra = total % workers;
    (0..workers).map(|i| base + usize::from(i < extra)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_sums_and_balances() {
        assert_eq!(partition(50, 4), vec![13, 13, 12, 12]);
        assert_eq!(partition(4, 4), vec![1, 1, 1, 1]);
        assert_eq!(partition(3, 4), vec![1, 1, 1, 0]);
        assert_eq!(partition(0, 2), vec![0, 0]);

        for (total, workers) in [(50, 4), (7, 3), (100, 6), (1, 5)] {
            let shares = partition(total, workers);
            assert_eq!(shares.iter().sum::<usize>(), total);
            let max = shares.iter().max().unwrap();
            let min = shares.iter().min().unwrap();
            assert!(max - min <= 1);
        }
    }
}
