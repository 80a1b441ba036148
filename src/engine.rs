use std::process::{Child, Command, ExitStatus, Output, Stdio};

use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::timer::Phase;

/// `sh` exit codes meaning the command was never run.
const NOT_EXECUTABLE: i32 = 126;
const NOT_FOUND: i32 = 127;

/// Runs engine command lines through `sh -c`.
#[derive(Debug, Clone)]
pub struct ContainerEngine {
    shell: String,
}

impl Default for ContainerEngine {
    fn default() -> Self {
        ContainerEngine {
            shell: String::from("sh"),
        }
    }
}

impl ContainerEngine {
    fn command(&self, line: &str) -> Command {
        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(line);
        command
    }

    /// Runs `line` to completion, capturing its output.
    ///
    /// # Returns
    /// * `Result<Output, BenchError>` - The output whatever the exit status,
    ///   or `Invocation` if nothing could be launched.
    pub fn execute(&self, line: &str) -> Result<Output> {
        info!("{}", line);
        let output = self
            .command(line)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BenchError::Invocation {
                command: line.to_string(),
                reason: e.to_string(),
            })?;
        check_launched(line, &output.status, &output.stderr)?;
        Ok(output)
    }

    /// Like [`ContainerEngine::execute`], but a non-zero exit is an error.
    pub fn execute_checked(&self, phase: Phase, line: &str) -> Result<Output> {
        let output = self.execute(line)?;
        if !output.status.success() {
            return Err(non_zero_exit(phase, line, &output.status, &output.stderr));
        }
        debug!("{}", String::from_utf8_lossy(&output.stdout).trim_end());
        Ok(output)
    }

    /// Starts `line` in the background with the given stdio wiring.
    pub fn spawn(&self, line: &str, stdin: Stdio, stdout: Stdio, stderr: Stdio) -> Result<Child> {
        info!("{}", line);
        self.command(line)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| BenchError::Invocation {
                command: line.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Turns the shell's "could not run this" exit codes into `Invocation`.
pub fn check_launched(line: &str, status: &ExitStatus, stderr: &[u8]) -> Result<()> {
    match status.code() {
        Some(NOT_EXECUTABLE) | Some(NOT_FOUND) => Err(BenchError::Invocation {
            command: line.to_string(),
            reason: String::from_utf8_lossy(stderr).trim().to_string(),
        }),
        _ => Ok(()),
    }
}

pub fn non_zero_exit(phase: Phase, line: &str, status: &ExitStatus, stderr: &[u8]) -> BenchError {
    BenchError::NonZeroExit {
        phase,
        command: line.to_string(),
        status: status.to_string(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}
