//! Deciding when the run phase of a benchmark is over.
//!
//! A started container is "ready" according to its [`ReadinessPolicy`]:
//! when an attached start exits, when a line shows up in its output, when
//! an HTTP probe succeeds, or when a piped-in script has finished.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn, Level};

use crate::command_builder::CommandBuilder;
use crate::config::Config;
use crate::engine::{check_launched, non_zero_exit, ContainerEngine};
use crate::error::{BenchError, Result};
use crate::policy::{is_shell, ReadinessPolicy, StartMode};
use crate::timer::Phase;

/// How long a line reader may stay silent before the detector looks at
/// cancellation and the deadline again.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Upper bound on a single HTTP probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a URL wait asks the engine whether the container still runs.
const STATE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    NotStarted,
    Started,
    Observing,
    Ready,
    TornDown,
    Failed,
}

impl ReadinessState {
    fn can_move_to(self, next: ReadinessState) -> bool {
        use ReadinessState::*;
        matches!(
            (self, next),
            (NotStarted, Started)
                | (Started, Observing)
                | (Started, Failed)
                | (Observing, Ready)
                | (Observing, Failed)
                | (Ready, TornDown)
        )
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared flag that aborts a readiness wait at its next check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub poll_interval: Duration,
    /// None waits forever.
    pub timeout: Option<Duration>,
    pub strict_stdin: bool,
    pub cancel: CancelToken,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        DetectorOptions {
            poll_interval: Duration::from_millis(10),
            timeout: None,
            strict_stdin: false,
            cancel: CancelToken::new(),
        }
    }
}

impl DetectorOptions {
    pub fn from_config(config: &Config) -> Self {
        DetectorOptions {
            poll_interval: config.poll_interval,
            timeout: config.readiness_timeout,
            strict_stdin: config.strict_stdin,
            cancel: CancelToken::new(),
        }
    }

    fn check(&self, started: Instant) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BenchError::Cancelled);
        }
        match self.timeout {
            Some(timeout) if started.elapsed() >= timeout => Err(BenchError::TimedOut(timeout)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Line(String),
    /// Nothing arrived yet but the stream is still open.
    Idle,
    End,
}

/// Line-by-line view over a process output pipe.
///
/// A background thread does the blocking reads, so the consumer can tell
/// "no data yet" apart from end-of-stream.
pub struct LineStream {
    rx: flume::Receiver<String>,
    tick: Duration,
}

impl LineStream {
    pub fn spawn<R: Read + Send + 'static>(reader: R, tick: Duration) -> Self {
        let (tx, rx) = flume::unbounded();

        thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    // EOF, dropping tx ends the stream
                    Ok(0) => return,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(&['\r', '\n'][..]).to_string();
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!("output reader stopped: {}", e);
                        return;
                    }
                }
            }
        });

        LineStream { rx, tick }
    }

    pub fn next_event(&self) -> StreamEvent {
        match self.rx.recv_timeout(self.tick) {
            Ok(line) => StreamEvent::Line(line),
            Err(flume::RecvTimeoutError::Timeout) => StreamEvent::Idle,
            Err(flume::RecvTimeoutError::Disconnected) => StreamEvent::End,
        }
    }
}

/// Drives the run phase of one container and times it.
pub struct ReadinessDetector<'a> {
    engine: &'a ContainerEngine,
    builder: &'a CommandBuilder,
    options: &'a DetectorOptions,
    state: ReadinessState,
}

impl<'a> ReadinessDetector<'a> {
    pub fn new(
        engine: &'a ContainerEngine,
        builder: &'a CommandBuilder,
        options: &'a DetectorOptions,
    ) -> Self {
        ReadinessDetector {
            engine,
            builder,
            options,
            state: ReadinessState::NotStarted,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    fn transition(&mut self, next: ReadinessState) -> Result<()> {
        if !self.state.can_move_to(next) {
            return Err(BenchError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("readiness {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Records a failure; only a started container can end up `Failed`.
    fn fail(&mut self, err: BenchError) -> BenchError {
        if matches!(
            self.state,
            ReadinessState::Started | ReadinessState::Observing
        ) {
            debug!("readiness {} -> Failed: {}", self.state, err);
            self.state = ReadinessState::Failed;
        }
        err
    }

    /// Marks the container as gone after a successful run.
    pub fn torn_down(&mut self) -> Result<()> {
        self.transition(ReadinessState::TornDown)
    }

    /// Starts `container` and blocks until it is ready.
    ///
    /// # Returns
    /// * `Result<Duration, BenchError>` - Time from launching the start
    ///   command until readiness was observed.
    pub fn run(&mut self, policy: &ReadinessPolicy, container: &str) -> Result<Duration> {
        debug!("running {} with {} readiness", container, policy);
        match policy {
            ReadinessPolicy::Immediate | ReadinessPolicy::Argument { .. } => {
                self.run_attached(container)
            }
            ReadinessPolicy::LogSubstring { needle, .. } => self.wait_for_line(container, needle),
            ReadinessPolicy::Stdin {
                script,
                interpreter,
            } => self.run_stdin(
                container,
                script,
                interpreter.as_deref().map_or(false, is_shell),
            ),
            ReadinessPolicy::Url { url, .. } => self.wait_for_url(container, url),
        }
    }

    /// Exit of the attached start is the readiness signal.
    fn run_attached(&mut self, container: &str) -> Result<Duration> {
        let line = self
            .builder
            .start(container, StartMode::Attached, false);
        let start = Instant::now();
        let child = self
            .engine
            .spawn(&line, Stdio::null(), Stdio::piped(), Stdio::piped())?;
        self.transition(ReadinessState::Started)?;
        self.transition(ReadinessState::Observing)?;

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(e) => return Err(self.fail(e.into())),
        };
        let elapsed = start.elapsed();

        if let Err(e) = check_launched(&line, &output.status, &output.stderr) {
            return Err(self.fail(e));
        }
        if !output.status.success() {
            return Err(self.fail(non_zero_exit(
                Phase::Run,
                &line,
                &output.status,
                &output.stderr,
            )));
        }
        debug!(
            "container output: {}",
            String::from_utf8_lossy(&output.stdout).trim_end()
        );

        self.transition(ReadinessState::Ready)?;
        Ok(elapsed)
    }

    /// Starts the container in the background; it is `Started` once the
    /// engine accepted the request.
    fn start_detached(&mut self, container: &str) -> Result<()> {
        let line = self
            .builder
            .start(container, StartMode::Detached, false);
        let output = self.engine.execute(&line)?;
        self.transition(ReadinessState::Started)?;
        if !output.status.success() {
            return Err(self.fail(non_zero_exit(
                Phase::Run,
                &line,
                &output.status,
                &output.stderr,
            )));
        }
        Ok(())
    }

    fn wait_for_line(&mut self, container: &str, needle: &str) -> Result<Duration> {
        let start = Instant::now();
        self.start_detached(container)?;

        // exec so that killing the child kills the follower itself
        let line = format!("exec {}", self.builder.logs(container));
        let mut follower = match self
            .engine
            .spawn(&line, Stdio::null(), Stdio::piped(), Stdio::null())
        {
            Ok(child) => child,
            Err(e) => return Err(self.fail(e)),
        };
        let stdout = match follower.stdout.take() {
            Some(stdout) => stdout,
            None => {
                stop_follower(&mut follower);
                return Err(self.fail(BenchError::Invocation {
                    command: line,
                    reason: "no stdout pipe".to_string(),
                }));
            }
        };
        let stream = LineStream::spawn(stdout, IDLE_TICK);
        self.transition(ReadinessState::Observing)?;

        loop {
            match stream.next_event() {
                StreamEvent::Line(out) => {
                    debug!("out: {}", out);
                    if out.contains(needle) {
                        let elapsed = start.elapsed();
                        stop_follower(&mut follower);
                        self.transition(ReadinessState::Ready)?;
                        return Ok(elapsed);
                    }
                }
                StreamEvent::Idle => trace!("no output from {} yet", container),
                StreamEvent::End => {
                    let status = follower.wait();
                    debug!("log follower exited: {:?}", status);
                    return Err(self.fail(BenchError::EndedBeforeReady {
                        needle: needle.to_string(),
                    }));
                }
            }
            if let Err(e) = self.options.check(start) {
                stop_follower(&mut follower);
                return Err(self.fail(e));
            }
        }
    }

    fn run_stdin(&mut self, container: &str, script: &str, shell: bool) -> Result<Duration> {
        let line = self.builder.start(container, StartMode::Attached, true);
        let start = Instant::now();
        let mut child = self
            .engine
            .spawn(&line, Stdio::piped(), Stdio::piped(), Stdio::piped())?;
        self.transition(ReadinessState::Started)?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut input = script.to_string();
            if !input.ends_with('\n') {
                input.push('\n');
            }
            if shell {
                input.push_str("exit\n");
            }
            // a container that dies early closes the pipe; its exit status tells the story
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                warn!("writing stdin of {} failed: {}", container, e);
            }
        }
        self.transition(ReadinessState::Observing)?;

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(e) => return Err(self.fail(e.into())),
        };
        let elapsed = start.elapsed();
        debug!(
            "container output: {}",
            String::from_utf8_lossy(&output.stdout).trim_end()
        );

        if let Err(e) = check_launched(&line, &output.status, &output.stderr) {
            return Err(self.fail(e));
        }
        if !output.status.success() {
            if self.options.strict_stdin {
                return Err(self.fail(non_zero_exit(
                    Phase::Run,
                    &line,
                    &output.status,
                    &output.stderr,
                )));
            }
            warn!(
                "{} exited with {}, tolerated for stdin benchmarks",
                container, output.status
            );
        }

        self.transition(ReadinessState::Ready)?;
        Ok(elapsed)
    }

    fn wait_for_url(&mut self, container: &str, url: &str) -> Result<Duration> {
        let start = Instant::now();
        self.start_detached(container)?;

        let client = match reqwest::blocking::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .no_proxy()
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                return Err(self.fail(BenchError::Invocation {
                    command: format!("GET {}", url),
                    reason: e.to_string(),
                }))
            }
        };
        self.transition(ReadinessState::Observing)?;

        let mut attempts = 0u64;
        let mut last_state_check = Instant::now();
        loop {
            attempts += 1;
            match client.get(url).send() {
                Ok(resp) if resp.status().is_success() => {
                    let elapsed = start.elapsed();
                    debug!("{} answered after {} attempts", url, attempts);
                    if tracing::enabled!(Level::DEBUG) {
                        match resp.text() {
                            Ok(body) => debug!("body: {}", body.trim()),
                            Err(e) => debug!("body unreadable: {}", e),
                        }
                    }
                    self.transition(ReadinessState::Ready)?;
                    return Ok(elapsed);
                }
                Ok(resp) => trace!("{} answered {}", url, resp.status()),
                Err(e) => trace!("{} not up yet: {}", url, e),
            }
            if let Err(e) = self.options.check(start) {
                return Err(self.fail(e));
            }
            if last_state_check.elapsed() >= STATE_CHECK_INTERVAL {
                last_state_check = Instant::now();
                if self.has_exited(container) {
                    return Err(self.fail(BenchError::ExitedBeforeReady {
                        container: container.to_string(),
                    }));
                }
            }
            thread::sleep(self.options.poll_interval);
        }
    }

    /// True only when the engine positively reports the container stopped;
    /// an unreadable answer keeps the wait going.
    fn has_exited(&self, container: &str) -> bool {
        let line = self.builder.running(container);
        match self.engine.execute(&line) {
            Ok(output) if output.status.success() => {
                let state = String::from_utf8_lossy(&output.stdout);
                trace!("{} running: {}", container, state.trim());
                state.trim() == "false"
            }
            Ok(output) => {
                debug!("{} exited with {}", line, output.status);
                false
            }
            Err(e) => {
                debug!("{}", e);
                false
            }
        }
    }
}

fn stop_follower(child: &mut Child) {
    if let Err(e) = child.kill() {
        trace!("log follower already gone: {}", e);
    }
    match child.wait() {
        Ok(status) => trace!("log follower stopped: {}", status),
        Err(e) => warn!("waiting for log follower failed: {}", e),
    }
}
