use std::fmt;

use serde_derive::Deserialize;
use tracing::warn;

/// Container command for images that just print and exit.
pub const ECHO_HELLO: &str = "echo hello";

/// Per-image run arguments, as they appear under `bench_args` in a catalog.
///
/// Every key is optional. `stdin_sh` defaults to `sh`; an explicit `null` or
/// empty string means the script is fed to the image's entrypoint instead.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchArgs {
    pub envs: Vec<(String, String)>,
    pub wait_line: String,
    pub wait_url: String,
    pub mount: Vec<(String, String)>,
    pub arg: String,
    pub stdin: String,
    pub stdin_sh: Option<String>,
    pub runtime: String,
    pub shm_size: String,
    pub work_dir: String,
}

impl Default for BenchArgs {
    fn default() -> Self {
        BenchArgs {
            envs: Vec::new(),
            wait_line: String::new(),
            wait_url: String::new(),
            mount: Vec::new(),
            arg: String::new(),
            stdin: String::new(),
            stdin_sh: Some(String::from("sh")),
            runtime: String::new(),
            shm_size: String::new(),
            work_dir: String::new(),
        }
    }
}

impl BenchArgs {
    pub fn arg(arg: &str) -> Self {
        BenchArgs {
            arg: arg.to_string(),
            ..Default::default()
        }
    }

    pub fn wait_line(line: &str) -> Self {
        BenchArgs {
            wait_line: line.to_string(),
            ..Default::default()
        }
    }

    pub fn wait_url(url: &str) -> Self {
        BenchArgs {
            wait_url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn stdin(script: &str) -> Self {
        BenchArgs {
            stdin: script.to_string(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_mount(mut self, host: &str, container: &str) -> Self {
        self.mount.push((host.to_string(), container.to_string()));
        self
    }

    pub fn with_arg(mut self, arg: &str) -> Self {
        self.arg = arg.to_string();
        self
    }

    pub fn with_stdin_sh(mut self, sh: Option<&str>) -> Self {
        self.stdin_sh = sh.map(str::to_string);
        self
    }
}

/// A bind mount; `source` is relative to the fixtures directory until the
/// run context copies it into scratch space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub destination: String,
}

/// Create-time settings shared by every readiness strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    pub environment: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub runtime: Option<String>,
    pub shm_size: Option<String>,
    pub work_dir: Option<String>,
}

/// How the run phase decides that a container is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Runs `echo hello` attached; ready at exit.
    Immediate,
    /// Runs `arg` (or the image default when empty) attached; ready at exit.
    Argument { arg: String },
    /// Ready at the first output line containing `needle`.
    LogSubstring { needle: String, arg: String },
    /// Pipes `script` into `interpreter` (or the entrypoint) and waits for exit.
    Stdin {
        script: String,
        interpreter: Option<String>,
    },
    /// Ready at the first successful GET against `url`.
    Url { url: String, arg: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Blocks until the container's main process exits.
    Attached,
    /// Returns once the container is running.
    Detached,
}

impl ReadinessPolicy {
    /// Command line baked into the container at create time, if any.
    pub fn container_command(&self) -> Option<&str> {
        match self {
            ReadinessPolicy::Immediate => Some(ECHO_HELLO),
            ReadinessPolicy::Argument { arg }
            | ReadinessPolicy::LogSubstring { arg, .. }
            | ReadinessPolicy::Url { arg, .. } => non_empty(arg),
            ReadinessPolicy::Stdin { interpreter, .. } => interpreter.as_deref(),
        }
    }

    pub fn interactive(&self) -> bool {
        matches!(self, ReadinessPolicy::Stdin { .. })
    }

    pub fn start_mode(&self) -> StartMode {
        match self {
            ReadinessPolicy::LogSubstring { .. } | ReadinessPolicy::Url { .. } => {
                StartMode::Detached
            }
            _ => StartMode::Attached,
        }
    }
}

impl fmt::Display for ReadinessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessPolicy::Immediate => write!(f, "immediate"),
            ReadinessPolicy::Argument { .. } => write!(f, "argument"),
            ReadinessPolicy::LogSubstring { needle, .. } => write!(f, "wait-line({})", needle),
            ReadinessPolicy::Stdin { .. } => write!(f, "stdin"),
            ReadinessPolicy::Url { url, .. } => write!(f, "wait-url({})", url),
        }
    }
}

/// Everything needed to create and run one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPolicy {
    pub options: ContainerOptions,
    pub readiness: ReadinessPolicy,
}

impl RunPolicy {
    /// Classifies bench arguments into a single readiness strategy.
    ///
    /// Order matters: no arguments at all is `Immediate`; arguments without
    /// any wait artifact are `Argument`; then wait line, stdin, and URL, in
    /// that order. Lower priority artifacts are ignored with a warning.
    pub fn from_args(args: Option<&BenchArgs>) -> RunPolicy {
        let args = match args {
            None => {
                return RunPolicy {
                    options: ContainerOptions::default(),
                    readiness: ReadinessPolicy::Immediate,
                }
            }
            Some(args) => args,
        };

        let options = ContainerOptions {
            environment: args.envs.clone(),
            mounts: args
                .mount
                .iter()
                .map(|(source, destination)| Mount {
                    source: source.clone(),
                    destination: destination.clone(),
                })
                .collect(),
            runtime: non_empty(&args.runtime).map(str::to_string),
            shm_size: non_empty(&args.shm_size).map(str::to_string),
            work_dir: non_empty(&args.work_dir).map(str::to_string),
        };

        let has_line = !args.wait_line.is_empty();
        let has_stdin = !args.stdin.is_empty();
        let has_url = !args.wait_url.is_empty();

        let readiness = if !has_line && !has_stdin && !has_url {
            ReadinessPolicy::Argument {
                arg: args.arg.clone(),
            }
        } else if has_line {
            if has_stdin || has_url {
                warn!(
                    "wait_line {:?} takes precedence over stdin/wait_url",
                    args.wait_line
                );
            }
            ReadinessPolicy::LogSubstring {
                needle: args.wait_line.clone(),
                arg: args.arg.clone(),
            }
        } else if has_stdin {
            if has_url {
                warn!("stdin takes precedence over wait_url {:?}", args.wait_url);
            }
            ReadinessPolicy::Stdin {
                script: args.stdin.clone(),
                interpreter: args
                    .stdin_sh
                    .as_deref()
                    .and_then(non_empty)
                    .map(str::to_string),
            }
        } else {
            ReadinessPolicy::Url {
                url: args.wait_url.clone(),
                arg: args.arg.clone(),
            }
        };

        RunPolicy { options, readiness }
    }
}

/// Whether `interpreter` is a POSIX-style shell that understands `exit`.
pub fn is_shell(interpreter: &str) -> bool {
    let program = interpreter.split_whitespace().next().unwrap_or("");
    let name = program.rsplit('/').next().unwrap_or(program);
    matches!(name, "sh" | "bash" | "ash" | "dash" | "zsh" | "ksh")
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
