mod common;

use std::fs;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use common::FakeEngine;
use hello_bench::command_builder::CommandBuilder;
use hello_bench::engine::ContainerEngine;
use hello_bench::error::BenchError;
use hello_bench::policy::ReadinessPolicy;
use hello_bench::readiness::{DetectorOptions, ReadinessDetector, ReadinessState};
use hello_bench::timer::Phase;

fn log_wait(needle: &str) -> ReadinessPolicy {
	ReadinessPolicy::LogSubstring {
		needle: needle.to_string(),
		arg: String::new(),
	}
}

fn free_port() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	listener.local_addr().unwrap().port()
}

#[test]
fn test_immediate_is_ready_when_start_returns() {
	let fake = FakeEngine::new("\tstart) sleep 0.2; echo hello ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let elapsed = detector.run(&ReadinessPolicy::Immediate, "c1").unwrap();
	assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);
	assert_eq!(detector.state(), ReadinessState::Ready);
	assert_eq!(fake.calls(), vec!["start -a c1"]);

	detector.torn_down().unwrap();
	assert_eq!(detector.state(), ReadinessState::TornDown);
}

#[test]
fn test_attached_failure_is_a_run_error() {
	let fake = FakeEngine::new("\tstart) echo boom >&2; exit 2 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Argument {
		arg: "false".to_string(),
	};
	match detector.run(&policy, "c1").unwrap_err() {
		BenchError::NonZeroExit { phase, stderr, .. } => {
			assert_eq!(phase, Phase::Run);
			assert_eq!(stderr, "boom");
		}
		other => panic!("unexpected {:?}", other),
	}
	assert_eq!(detector.state(), ReadinessState::Failed);
	assert!(matches!(
		detector.torn_down(),
		Err(BenchError::IllegalTransition { .. })
	));
}

#[test]
fn test_log_wait_stops_at_first_matching_line() {
	let fake = FakeEngine::new(concat!(
		"\tlogs) echo booting; sleep 0.1; echo 'still loading'; sleep 0.2; ",
		"echo '1:M * Ready to accept connections tcp'; exec sleep 5 ;;"
	));
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let begin = Instant::now();
	let elapsed = detector
		.run(&log_wait("Ready to accept connections"), "c1")
		.unwrap();
	assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
	// the follower is killed instead of draining the trailing sleep
	assert!(begin.elapsed() < Duration::from_secs(4));
	assert_eq!(detector.state(), ReadinessState::Ready);
	assert_eq!(fake.subcommands(), vec!["start", "logs"]);
	assert_eq!(fake.calls()[0], "start c1");
	assert_eq!(fake.calls()[1], "logs -f c1");
}

#[test]
fn test_line_equal_to_needle_matches() {
	let fake = FakeEngine::new("\tlogs) echo 'Started.'; exec sleep 5 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	assert!(detector.run(&log_wait("Started."), "c1").is_ok());
}

#[test]
fn test_needle_on_stderr_is_seen() {
	let fake = FakeEngine::new("\tlogs) echo 'mongod waiting for connections' >&2; exec sleep 5 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	assert!(detector
		.run(&log_wait("waiting for connections"), "c1")
		.is_ok());
}

#[test]
fn test_output_ending_without_needle_fails() {
	let fake = FakeEngine::new("\tlogs) echo booting; echo crashed ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let err = detector.run(&log_wait("ready"), "c1").unwrap_err();
	assert!(
		matches!(err, BenchError::EndedBeforeReady { ref needle } if needle == "ready"),
		"{:?}",
		err
	);
	assert_eq!(detector.state(), ReadinessState::Failed);
}

#[test]
fn test_detached_start_failure_is_reported() {
	let fake = FakeEngine::new("\tstart) echo 'no such container' >&2; exit 1 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let err = detector.run(&log_wait("ready"), "c1").unwrap_err();
	assert!(matches!(err, BenchError::NonZeroExit { .. }), "{:?}", err);
	assert_eq!(detector.state(), ReadinessState::Failed);
	assert_eq!(fake.subcommands(), vec!["start"]);
}

#[test]
fn test_log_wait_honours_timeout() {
	let fake = FakeEngine::new("\tlogs) echo booting; exec sleep 5 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions {
		timeout: Some(Duration::from_millis(300)),
		..Default::default()
	};
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let begin = Instant::now();
	let err = detector.run(&log_wait("ready"), "c1").unwrap_err();
	assert!(matches!(err, BenchError::TimedOut(_)), "{:?}", err);
	assert!(begin.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_cancel_aborts_the_wait() {
	let fake = FakeEngine::new("\tlogs) exec sleep 5 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	options.cancel.cancel();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let err = detector.run(&log_wait("ready"), "c1").unwrap_err();
	assert!(matches!(err, BenchError::Cancelled), "{:?}", err);
	assert_eq!(detector.state(), ReadinessState::Failed);
}

#[test]
fn test_stdin_script_is_piped_and_exit_tolerated() {
	let fake = FakeEngine::new("\tstart) cat > \"$(dirname \"$0\")/stdin.txt\"; exit 3 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Stdin {
		script: "echo hello".to_string(),
		interpreter: Some("sh".to_string()),
	};
	detector.run(&policy, "c1").unwrap();
	assert_eq!(detector.state(), ReadinessState::Ready);
	assert_eq!(fake.calls(), vec!["start -a -i c1"]);

	let piped = fs::read_to_string(fake.dir.path().join("stdin.txt")).unwrap();
	assert_eq!(piped, "echo hello\nexit\n");
}

#[test]
fn test_stdin_without_interpreter_gets_no_exit() {
	let fake = FakeEngine::new("\tstart) cat > \"$(dirname \"$0\")/stdin.txt\" ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Stdin {
		script: "(println \"hello\")\n".to_string(),
		interpreter: None,
	};
	detector.run(&policy, "c1").unwrap();

	let piped = fs::read_to_string(fake.dir.path().join("stdin.txt")).unwrap();
	assert_eq!(piped, "(println \"hello\")\n");
}

#[test]
fn test_strict_stdin_fails_on_non_zero_exit() {
	let fake = FakeEngine::new("\tstart) cat > /dev/null; exit 3 ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions {
		strict_stdin: true,
		..Default::default()
	};
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Stdin {
		script: "exit 3".to_string(),
		interpreter: Some("sh".to_string()),
	};
	let err = detector.run(&policy, "c1").unwrap_err();
	assert!(matches!(err, BenchError::NonZeroExit { .. }), "{:?}", err);
	assert_eq!(detector.state(), ReadinessState::Failed);
}

#[test]
fn test_url_wait_retries_until_success() {
	let port = free_port();
	let server = thread::spawn(move || {
		// not listening at all for a while, then one 503 before the real answer
		thread::sleep(Duration::from_millis(300));
		let server = tiny_http::Server::http(("127.0.0.1", port)).unwrap();
		let request = server.recv().unwrap();
		request
			.respond(tiny_http::Response::from_string("starting").with_status_code(503))
			.unwrap();
		let request = server.recv().unwrap();
		request
			.respond(tiny_http::Response::from_string("Welcome to nginx!"))
			.unwrap();
	});

	let fake = FakeEngine::new("");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Url {
		url: format!("http://127.0.0.1:{}/", port),
		arg: String::new(),
	};
	let elapsed = detector.run(&policy, "c1").unwrap();
	server.join().unwrap();

	assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
	assert_eq!(detector.state(), ReadinessState::Ready);
	assert_eq!(fake.calls(), vec!["start c1"]);
}

#[test]
fn test_url_wait_honours_timeout() {
	let port = free_port();
	let fake = FakeEngine::new("");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions {
		timeout: Some(Duration::from_millis(200)),
		..Default::default()
	};
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Url {
		url: format!("http://127.0.0.1:{}/", port),
		arg: String::new(),
	};
	let err = detector.run(&policy, "c1").unwrap_err();
	assert!(matches!(err, BenchError::TimedOut(_)), "{:?}", err);
}

#[test]
fn test_url_wait_fails_when_container_exits() {
	let port = free_port();
	let fake = FakeEngine::new("\tinspect) echo false ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Url {
		url: format!("http://127.0.0.1:{}/", port),
		arg: String::new(),
	};
	let begin = Instant::now();
	let err = detector.run(&policy, "c1").unwrap_err();
	assert!(
		matches!(err, BenchError::ExitedBeforeReady { ref container } if container == "c1"),
		"{:?}",
		err
	);
	assert!(begin.elapsed() < Duration::from_secs(5));
	assert_eq!(detector.state(), ReadinessState::Failed);
	assert_eq!(fake.subcommands(), vec!["start", "inspect"]);
	assert_eq!(fake.calls()[1], "inspect -f {{.State.Running}} c1");
}

#[test]
fn test_url_wait_keeps_polling_a_running_container() {
	let port = free_port();
	let server = thread::spawn(move || {
		thread::sleep(Duration::from_millis(1500));
		let server = tiny_http::Server::http(("127.0.0.1", port)).unwrap();
		let request = server.recv().unwrap();
		request
			.respond(tiny_http::Response::from_string("up"))
			.unwrap();
	});

	let fake = FakeEngine::new("\tinspect) echo true ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Url {
		url: format!("http://127.0.0.1:{}/", port),
		arg: String::new(),
	};
	let elapsed = detector.run(&policy, "c1").unwrap();
	server.join().unwrap();

	assert!(elapsed >= Duration::from_millis(1500), "{:?}", elapsed);
	assert!(fake.subcommands().iter().any(|c| c == "inspect"));
	assert_eq!(detector.state(), ReadinessState::Ready);
}

#[test]
fn test_non_shell_interpreter_gets_no_exit() {
	let fake = FakeEngine::new("\tstart) cat > \"$(dirname \"$0\")/stdin.txt\" ;;");
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	let policy = ReadinessPolicy::Stdin {
		script: "sprintf(\"hello\")".to_string(),
		interpreter: Some("R --no-save".to_string()),
	};
	detector.run(&policy, "c1").unwrap();

	let piped = fs::read_to_string(fake.dir.path().join("stdin.txt")).unwrap();
	assert_eq!(piped, "sprintf(\"hello\")\n");
}

#[test]
fn test_log_follower_is_gone_after_match() {
	let fake = FakeEngine::new(concat!(
		"\tlogs) echo $$ > \"$(dirname \"$0\")/follower.pid\"; ",
		"echo 'Server ready'; exec sleep 30 ;;"
	));
	let engine = ContainerEngine::default();
	let builder = CommandBuilder::new(&fake.config());
	let options = DetectorOptions::default();
	let mut detector = ReadinessDetector::new(&engine, &builder, &options);

	detector.run(&log_wait("Server ready"), "c1").unwrap();

	let pid = fs::read_to_string(fake.dir.path().join("follower.pid")).unwrap();
	let alive = std::process::Command::new("kill")
		.args(["-0", pid.trim()])
		.stderr(std::process::Stdio::null())
		.status()
		.unwrap();
	assert!(!alive.success(), "follower {} still running", pid.trim());
}
