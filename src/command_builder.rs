//! Literal engine command lines for every phase of a benchmark run.
//!
//! Nothing here touches the system: each function only formats a line that
//! the engine wrapper later hands to `sh -c`. Lines are assembled from parts
//! joined by single spaces, so an option that is not set leaves no trace.

use crate::config::{Config, EngineKind, Snapshotter};
use crate::descriptor::BenchmarkDescriptor;
use crate::policy::{Mount, RunPolicy, StartMode};

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    engine: EngineKind,
    bin: String,
    snapshotter: Snapshotter,
    registry: String,
    network: String,
    stop_timeout: Option<u32>,
}

impl CommandBuilder {
    pub fn new(config: &Config) -> Self {
        CommandBuilder {
            engine: config.engine,
            bin: config.engine_bin.clone(),
            snapshotter: config.snapshotter,
            registry: config.registry.clone(),
            network: config.network.clone(),
            stop_timeout: config.stop_timeout,
        }
    }

    /// Full reference of the image to pull, including the registry prefix.
    pub fn image_ref(&self, bench: &BenchmarkDescriptor) -> String {
        let registry = self.registry.trim_end_matches('/');
        if registry.is_empty() {
            bench.name.clone()
        } else {
            format!("{}/{}", registry, bench.name)
        }
    }

    /// Engine binary plus the global flags every subcommand accepts.
    fn base(&self, subcommand: &str) -> Vec<String> {
        // the binary is a literal prefix so `sudo nerdctl` works
        let mut parts = vec![self.bin.trim().to_string()];
        if self.engine.accepts_snapshotter() {
            parts.push(format!("--snapshotter={}", self.snapshotter));
        }
        parts.push(subcommand.to_string());
        parts
    }

    pub fn pull(&self, bench: &BenchmarkDescriptor) -> String {
        let mut parts = self.base("pull");
        parts.push(shell_quote(&self.image_ref(bench)));
        parts.join(" ")
    }

    /// # Arguments
    /// * `mounts` - Mounts whose sources were already copied to scratch space.
    /// * `container` - Name the container is created under.
    pub fn create(
        &self,
        bench: &BenchmarkDescriptor,
        policy: &RunPolicy,
        mounts: &[Mount],
        container: &str,
    ) -> String {
        let mut parts = self.base("create");
        if !self.network.is_empty() {
            parts.push(format!("--net={}", shell_quote(&self.network)));
        }
        parts.push(format!("--name={}", shell_quote(container)));
        if policy.readiness.interactive() {
            parts.push("-i".to_string());
        }

        let options = &policy.options;
        for (key, value) in &options.environment {
            parts.push("-e".to_string());
            parts.push(shell_quote(&format!("{}={}", key, value)));
        }
        for m in mounts {
            parts.push("-v".to_string());
            parts.push(shell_quote(&format!("{}:{}", m.source, m.destination)));
        }
        if let Some(runtime) = &options.runtime {
            parts.push(format!("--runtime={}", shell_quote(runtime)));
        }
        if let Some(shm_size) = &options.shm_size {
            parts.push(format!("--shm-size={}", shell_quote(shm_size)));
        }
        if let Some(work_dir) = &options.work_dir {
            parts.push("-w".to_string());
            parts.push(shell_quote(work_dir));
        }

        parts.push(shell_quote(&self.image_ref(bench)));
        // the container command is a literal shell fragment, never quoted
        if let Some(command) = policy.readiness.container_command() {
            parts.push(command.trim().to_string());
        }
        parts.join(" ")
    }

    pub fn start(&self, container: &str, mode: StartMode, interactive: bool) -> String {
        let mut parts = self.base("start");
        if mode == StartMode::Attached {
            parts.push("-a".to_string());
            if interactive {
                parts.push("-i".to_string());
            }
        }
        parts.push(shell_quote(container));
        parts.join(" ")
    }

    /// Follows the container's output with stderr folded into stdout.
    pub fn logs(&self, container: &str) -> String {
        let mut parts = self.base("logs");
        parts.push("-f".to_string());
        parts.push(shell_quote(container));
        parts.push("2>&1".to_string());
        parts.join(" ")
    }

    /// Prints `true` while the container's main process is running.
    pub fn running(&self, container: &str) -> String {
        let mut parts = self.base("inspect");
        parts.push("-f".to_string());
        parts.push(shell_quote("{{.State.Running}}"));
        parts.push(shell_quote(container));
        parts.join(" ")
    }

    pub fn stop(&self, container: &str) -> String {
        let mut parts = self.base("stop");
        if let Some(t) = self.stop_timeout {
            parts.push(format!("-t {}", t));
        }
        parts.push(shell_quote(container));
        parts.join(" ")
    }

    pub fn remove(&self, container: &str) -> String {
        let mut parts = self.base("rm");
        parts.push(shell_quote(container));
        parts.join(" ")
    }

    pub fn remove_image(&self, bench: &BenchmarkDescriptor) -> String {
        let mut parts = self.base("rmi");
        parts.push(shell_quote(&self.image_ref(bench)));
        parts.join(" ")
    }
}

/// Quotes `s` for `sh` unless it is made only of obviously safe characters.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
