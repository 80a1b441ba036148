#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use hello_bench::config::{Config, EngineKind, OutputFormat};
use tempfile::TempDir;

/// A shell script standing in for the container CLI.
///
/// Every invocation is appended to `calls.log`; `arms` are extra `case`
/// branches keyed by subcommand, anything else exits 0.
pub struct FakeEngine {
	pub dir: TempDir,
	pub script: PathBuf,
	pub log: PathBuf,
}

impl FakeEngine {
	pub fn new(arms: &str) -> FakeEngine {
		let dir = tempfile::tempdir().unwrap();
		let script = dir.path().join("engine.sh");
		let log = dir.path().join("calls.log");
		let body = format!(
			r#"echo "$*" >> "{log}"
while [ $# -gt 0 ]; do
	case "$1" in
		--*) shift ;;
		*) break ;;
	esac
done
cmd="$1"
shift
case "$cmd" in
{arms}
	*) exit 0 ;;
esac
"#,
			log = log.display(),
			arms = arms,
		);
		fs::write(&script, body).unwrap();
		FakeEngine { dir, script, log }
	}

	pub fn config(&self) -> Config {
		Config {
			engine: EngineKind::Docker,
			engine_bin: format!("sh {}", self.script.display()),
			fixtures_dir: self.dir.path().to_path_buf(),
			output_path: self.dir.path().join("bench.out"),
			output_format: OutputFormat::Json,
			poll_interval: Duration::from_millis(10),
			..Config::default()
		}
	}

	/// Subcommand lines in invocation order, global flags stripped.
	pub fn calls(&self) -> Vec<String> {
		fs::read_to_string(&self.log)
			.unwrap_or_default()
			.lines()
			.map(|l| {
				l.split_whitespace()
					.skip_while(|w| w.starts_with("--"))
					.collect::<Vec<_>>()
					.join(" ")
			})
			.collect()
	}

	/// Just the subcommand names, in order.
	pub fn subcommands(&self) -> Vec<String> {
		self.calls()
			.iter()
			.filter_map(|c| c.split_whitespace().next().map(str::to_string))
			.collect()
	}
}
