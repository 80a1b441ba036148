use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::install_dir;

/// Which container CLI drives the benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// docker-compatible CLI, no snapshotter selection.
    Docker,
    /// containerd front end, takes `--snapshotter`.
    Nerdctl,
}

impl EngineKind {
    pub fn default_bin(&self) -> &'static str {
        match self {
            EngineKind::Docker => "docker",
            EngineKind::Nerdctl => "nerdctl",
        }
    }

    pub fn accepts_snapshotter(&self) -> bool {
        matches!(self, EngineKind::Nerdctl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Snapshotter {
    Overlayfs,
    Nydus,
    Stargz,
}

impl fmt::Display for Snapshotter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Snapshotter::Overlayfs => "overlayfs",
            Snapshotter::Nydus => "nydus",
            Snapshotter::Stargz => "stargz",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per line.
    Json,
    Csv,
}

pub struct Config {
    pub engine: EngineKind,
    /// Shell prefix invoking the engine, e.g. `nerdctl` or `sudo nerdctl`.
    pub engine_bin: String,
    pub snapshotter: Snapshotter,
    /// Prefix for every image reference, e.g. `localhost:5000`.
    pub registry: String,
    /// Tag applied to images given without one.
    pub tag: String,
    pub network: String,
    pub repeat: usize,
    /// Where relative mount sources are looked up.
    pub fixtures_dir: PathBuf,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
    /// Delay between readiness probes.
    pub poll_interval: Duration,
    /// None waits forever.
    pub readiness_timeout: Option<Duration>,
    /// Treat a non-zero exit of a stdin-driven container as a failure.
    pub strict_stdin: bool,
    /// Seconds passed to `stop -t`; None leaves the engine default.
    pub stop_timeout: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineKind::Nerdctl,
            engine_bin: EngineKind::Nerdctl.default_bin().to_string(),
            snapshotter: Snapshotter::Overlayfs,
            registry: String::new(),
            tag: String::from("latest"),
            network: String::from("host"),
            repeat: 1,
            fixtures_dir: install_dir().unwrap_or_else(|_| PathBuf::from(".")),
            output_path: PathBuf::from("bench.out"),
            output_format: OutputFormat::Json,
            poll_interval: Duration::from_millis(10),
            readiness_timeout: None,
            strict_stdin: false,
            stop_timeout: None,
        }
    }
}
