use std::time::Duration;

use tracing::{error, info, warn};

use crate::command_builder::CommandBuilder;
use crate::config::Config;
use crate::context::Context;
use crate::descriptor::BenchmarkDescriptor;
use crate::engine::ContainerEngine;
use crate::error::{BenchError, Result};
use crate::metrics::{PhaseTimings, TimingRecord};
use crate::policy::RunPolicy;
use crate::readiness::{CancelToken, DetectorOptions, ReadinessDetector};
use crate::report::RecordWriter;
use crate::timer::{time_phase, Phase};
use crate::utils::container_name;

/**
 * Benchmarker
 * Runs images one at a time: pull, create, start until ready, tear down.
 * Owns the batch context, so the scratch root lives exactly as long as it.
 */
#[derive(Debug)]
pub struct Benchmarker {
    pub context: Context,
    engine: ContainerEngine,
    builder: CommandBuilder,
    options: DetectorOptions,
    repeat: usize,
}

/// What a run managed to create, so teardown never touches anything else.
#[derive(Debug, Default)]
struct RunResources {
    image: bool,
    container: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub bench: String,
    /// 1-based.
    pub repetition: usize,
    pub result: std::result::Result<TimingRecord, BenchError>,
}

/// Per-run success and failure of a whole batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<RunOutcome>,
    /// Set when the batch stopped early because it was cancelled.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TimingRecord> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.failed().next().is_none()
    }
}

impl Benchmarker {
    pub fn new(config: &Config, context: Context) -> Benchmarker {
        Benchmarker {
            context,
            engine: ContainerEngine::default(),
            builder: CommandBuilder::new(config),
            options: DetectorOptions::from_config(config),
            repeat: config.repeat,
        }
    }

    /// Token that aborts the readiness wait in progress and keeps
    /// [`Benchmarker::run_all`] from starting further runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.options.cancel.clone()
    }

    /// Benchmarks one image once.
    ///
    /// Teardown is always attempted for whatever was created, even when a
    /// phase failed. A failed `rmi` fails the run; failed `stop`/`rm` only
    /// log a warning.
    ///
    /// # Returns
    /// * `Result<PhaseTimings, BenchError>` - Pull, create and run durations.
    pub fn run_benchmark(
        &mut self,
        bench: &BenchmarkDescriptor,
        policy: &RunPolicy,
    ) -> Result<PhaseTimings> {
        let container = container_name(&bench.repo);
        let mut resources = RunResources::default();

        let Benchmarker {
            context,
            engine,
            builder,
            options,
            ..
        } = self;
        let mut detector = ReadinessDetector::new(engine, builder, options);

        info!(
            "benchmarking {} ({}) as {}",
            bench.name, policy.readiness, container
        );
        let measured = measure(
            engine,
            builder,
            context,
            &mut detector,
            bench,
            policy,
            &container,
            &mut resources,
        );
        let teardown = teardown(engine, builder, bench, &container, &resources);

        match (measured, teardown) {
            (Ok(timings), Ok(())) => {
                detector.torn_down()?;
                Ok(timings)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                warn!("{}", teardown_err);
                Err(e)
            }
        }
    }

    /// Runs every image `repeat` times in sequence, writing a row per
    /// successful run. A failed run never stops the batch; cancellation
    /// does, once the run in progress has been torn down.
    pub fn run_all(
        &mut self,
        benches: &[(BenchmarkDescriptor, &RunPolicy)],
        writer: &mut dyn RecordWriter,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        'batch: for (bench, policy) in benches {
            for repetition in 1..=self.repeat {
                if self.options.cancel.is_cancelled() {
                    warn!("cancelled, not starting {} run {}", bench.name, repetition);
                    report.cancelled = true;
                    break 'batch;
                }
                info!("{} run {}/{}", bench.name, repetition, self.repeat);
                let result = self
                    .run_benchmark(bench, policy)
                    .map(|timings| TimingRecord::new(bench, &timings))
                    .and_then(|record| {
                        writer.write_record(&record)?;
                        Ok(record)
                    });
                if let Err(e) = &result {
                    error!(
                        "{} run {}/{} failed: {}",
                        bench.name, repetition, self.repeat, e
                    );
                }
                report.outcomes.push(RunOutcome {
                    bench: bench.name.clone(),
                    repetition,
                    result,
                });
            }
        }

        report
    }
}

#[allow(clippy::too_many_arguments)]
fn measure(
    engine: &ContainerEngine,
    builder: &CommandBuilder,
    context: &mut Context,
    detector: &mut ReadinessDetector,
    bench: &BenchmarkDescriptor,
    policy: &RunPolicy,
    container: &str,
    resources: &mut RunResources,
) -> Result<PhaseTimings> {
    let pull = time_phase(engine, Phase::Pull, &builder.pull(bench))?;
    resources.image = true;

    let mounts = context.prepare_mounts(&policy.options.mounts)?;
    let create = time_phase(
        engine,
        Phase::Create,
        &builder.create(bench, policy, &mounts, container),
    )?;
    resources.container = true;

    let run = detector.run(&policy.readiness, container)?;
    info!("run took {:.6}s", run.as_secs_f64());

    Ok(PhaseTimings { pull, create, run })
}

fn teardown(
    engine: &ContainerEngine,
    builder: &CommandBuilder,
    bench: &BenchmarkDescriptor,
    container: &str,
    resources: &RunResources,
) -> Result<()> {
    if resources.container {
        for line in [builder.stop(container), builder.remove(container)] {
            if let Err(e) = run_teardown_step(engine, &line) {
                warn!("{}", e);
            }
        }
    }

    if resources.image {
        let line = builder.remove_image(bench);
        if let Err(e) = run_teardown_step(engine, &line) {
            warn!("{} may be left behind for the next run: {}", bench.name, e);
            return Err(e);
        }
    }

    Ok(())
}

fn run_teardown_step(engine: &ContainerEngine, line: &str) -> Result<Duration> {
    let to_teardown_error = |reason: String| BenchError::Teardown {
        command: line.to_string(),
        reason,
    };
    time_phase(engine, Phase::Teardown, line).map_err(|e| match e {
        BenchError::NonZeroExit { status, stderr, .. } => {
            to_teardown_error(format!("exited with {}: {}", status, stderr))
        }
        other => to_teardown_error(other.to_string()),
    })
}
