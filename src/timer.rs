use std::fmt;
use std::time::{Duration, Instant};

use tracing::info;

use crate::engine::ContainerEngine;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pull,
    Create,
    Run,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pull => "pull",
            Phase::Create => "create",
            Phase::Run => "run",
            Phase::Teardown => "teardown",
        };
        write!(f, "{}", s)
    }
}

/// Runs one synchronous phase to completion and measures it.
///
/// The clock is monotonic and spans only the engine invocation. A non-zero
/// exit is returned as an error and never retried.
pub fn time_phase(engine: &ContainerEngine, phase: Phase, line: &str) -> Result<Duration> {
    let start = Instant::now();
    engine.execute_checked(phase, line)?;
    let elapsed = start.elapsed();
    info!("{} took {:.6}s", phase, elapsed.as_secs_f64());
    Ok(elapsed)
}
