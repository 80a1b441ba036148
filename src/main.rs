use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::Parser;
use clap_derive::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hello_bench::benchmark::Benchmarker;
use hello_bench::catalog::Catalog;
use hello_bench::config::{Config, EngineKind, OutputFormat, Snapshotter};
use hello_bench::context::Context;
use hello_bench::report::{open_writer, JsonLinesWriter, RecordWriter, Tee};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EngineArg {
    Docker,
    Nerdctl,
}

impl From<EngineArg> for EngineKind {
    fn from(value: EngineArg) -> Self {
        match value {
            EngineArg::Docker => EngineKind::Docker,
            EngineArg::Nerdctl => EngineKind::Nerdctl,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SnapshotterArg {
    Overlayfs,
    Nydus,
    Stargz,
}

impl From<SnapshotterArg> for Snapshotter {
    fn from(value: SnapshotterArg) -> Self {
        match value {
            SnapshotterArg::Overlayfs => Snapshotter::Overlayfs,
            SnapshotterArg::Nydus => Snapshotter::Nydus,
            SnapshotterArg::Stargz => Snapshotter::Stargz,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Csv => OutputFormat::Csv,
        }
    }
}

/// Measures pull, create and run latency of container images.
#[derive(Parser)]
#[clap(name = "hello-bench")]
struct Args {
    /// Images to benchmark, `repo` or `repo:tag`
    #[arg(long = "images", num_args = 1..)]
    images: Vec<String>,

    /// Benchmark every image in the catalog
    #[arg(long)]
    all: bool,

    /// Only benchmark images of this category (with --all)
    #[arg(long, requires = "all")]
    category: Option<String>,

    /// YAML catalog merged over the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Print the catalog and exit
    #[arg(long)]
    list: bool,

    #[arg(long, value_enum, default_value = "nerdctl")]
    engine: EngineArg,

    /// Engine binary, defaults to the engine name
    #[arg(long)]
    engine_bin: Option<String>,

    #[arg(long, value_enum, default_value = "overlayfs")]
    snapshotter: SnapshotterArg,

    #[arg(long, default_value = "")]
    registry: String,

    /// Tag for images given without one
    #[arg(long, default_value = "latest")]
    tag: String,

    #[arg(long, default_value = "host")]
    network: String,

    /// Runs per image
    #[arg(
        short,
        long,
        default_value_t = 1,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    repeat: usize,

    /// Directory that relative mount sources are resolved against
    #[arg(long)]
    fixtures_dir: Option<PathBuf>,

    #[arg(short, long, default_value = "bench.out")]
    out: PathBuf,

    #[arg(long, value_enum, default_value = "json")]
    format: FormatArg,

    /// Delay between readiness probes
    #[arg(long, default_value_t = 10)]
    poll_interval_ms: u64,

    /// Give up waiting for readiness after this many seconds
    #[arg(long)]
    readiness_timeout_secs: Option<u64>,

    /// Fail stdin benchmarks whose container exits non-zero
    #[arg(long)]
    strict_stdin: bool,

    /// Seconds passed to `stop -t`
    #[arg(long)]
    stop_timeout: Option<u32>,

    /// Default log filter, RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> Config {
        let defaults = Config::default();
        let engine = EngineKind::from(self.engine);
        Config {
            engine,
            engine_bin: self
                .engine_bin
                .clone()
                .unwrap_or_else(|| engine.default_bin().to_string()),
            snapshotter: self.snapshotter.into(),
            registry: self.registry.clone(),
            tag: self.tag.clone(),
            network: self.network.clone(),
            repeat: self.repeat,
            fixtures_dir: self.fixtures_dir.clone().unwrap_or(defaults.fixtures_dir),
            output_path: self.out.clone(),
            output_format: self.format.into(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            readiness_timeout: self.readiness_timeout_secs.map(Duration::from_secs),
            strict_stdin: self.strict_stdin,
            stop_timeout: self.stop_timeout,
        }
    }
}

fn run(args: Args) -> anyhow::Result<bool> {
    let mut catalog = Catalog::builtin();
    if let Some(path) = &args.catalog {
        let extra = Catalog::load(path)
            .with_context(|| format!("loading catalog {}", path.display()))?;
        info!("loaded {} catalog entries from {}", extra.len(), path.display());
        catalog.merge(extra);
    }

    if args.list {
        for item in catalog.items() {
            println!(
                "{:<20} {:<14} {}",
                item.descriptor.name, item.descriptor.category, item.policy.readiness
            );
        }
        return Ok(true);
    }

    let config = args.config();
    let benches = if args.all {
        catalog.select_all(args.category.as_deref(), &config.tag)
    } else {
        catalog.select(&args.images, &config.tag)
    };
    if benches.is_empty() {
        bail!("nothing to benchmark, pass --images or --all");
    }

    let mut writer = Tee(vec![
        open_writer(config.output_format, &config.output_path)?,
        Box::new(JsonLinesWriter::new(io::stdout())) as Box<dyn RecordWriter>,
    ]);

    let context = Context::new(config.fixtures_dir.clone()).context("creating scratch root")?;
    let mut benchmarker = Benchmarker::new(&config, context);
    let token = benchmarker.cancel_token();
    ctrlc::set_handler(move || {
        warn!("interrupted, tearing down the current run");
        token.cancel();
    })
    .context("installing the interrupt handler")?;
    let report = benchmarker.run_all(&benches, &mut writer);

    if report.cancelled {
        warn!("batch cancelled before every run was started");
    }
    let ok = report.succeeded().count();
    let failed: Vec<_> = report.failed().collect();
    info!("{} runs succeeded, {} failed", ok, failed.len());
    for outcome in &failed {
        if let Err(e) = &outcome.result {
            error!("{} #{}: {}", outcome.bench, outcome.repetition, e);
        }
    }

    benchmarker.context.scratch.close()?;
    Ok(report.all_succeeded())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
