use std::time::Duration;

use serde::{Deserializer, Serializer};
use serde_derive::{Deserialize, Serialize};

use crate::descriptor::BenchmarkDescriptor;

/// Decimal places kept for elapsed seconds.
pub const ELAPSED_PRECISION: usize = 6;

/// Wall-clock time spent in each phase of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTimings {
    pub pull: Duration,
    pub create: Duration,
    pub run: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.pull + self.create + self.run
    }
}

/// One result row, created once per run and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub repo: String,
    pub bench: String,
    #[serde(serialize_with = "as_seconds", deserialize_with = "from_seconds")]
    pub pull_elapsed: f64,
    #[serde(serialize_with = "as_seconds", deserialize_with = "from_seconds")]
    pub create_elapsed: f64,
    #[serde(serialize_with = "as_seconds", deserialize_with = "from_seconds")]
    pub run_elapsed: f64,
    #[serde(serialize_with = "as_seconds", deserialize_with = "from_seconds")]
    pub total_elapsed: f64,
}

impl TimingRecord {
    pub fn new(bench: &BenchmarkDescriptor, timings: &PhaseTimings) -> Self {
        TimingRecord::at(chrono::Utc::now().timestamp_millis(), bench, timings)
    }

    /// Builds a record with an explicit timestamp.
    pub fn at(timestamp: i64, bench: &BenchmarkDescriptor, timings: &PhaseTimings) -> Self {
        let pull = timings.pull.as_secs_f64();
        let create = timings.create.as_secs_f64();
        let run = timings.run.as_secs_f64();
        TimingRecord {
            timestamp,
            repo: bench.repo.clone(),
            bench: bench.name.clone(),
            pull_elapsed: pull,
            create_elapsed: create,
            run_elapsed: run,
            total_elapsed: pull + create + run,
        }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Fields in CSV column order.
    pub fn csv_fields(&self) -> [String; 7] {
        [
            self.timestamp.to_string(),
            self.repo.clone(),
            self.bench.clone(),
            format_seconds(self.pull_elapsed),
            format_seconds(self.create_elapsed),
            format_seconds(self.run_elapsed),
            format_seconds(self.total_elapsed),
        ]
    }
}

pub fn format_seconds(secs: f64) -> String {
    format!("{:.*}", ELAPSED_PRECISION, secs)
}

fn as_seconds<S>(secs: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_seconds(*secs))
}

fn from_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = <String as serde::Deserialize>::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}
