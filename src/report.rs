use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::config::OutputFormat;
use crate::error::Result;
use crate::metrics::TimingRecord;
use crate::utils::exists_or_create_dir;

pub const CSV_HEADER: [&str; 7] = [
    "timestamp",
    "repo",
    "bench",
    "pull_elapsed(s)",
    "create_elapsed(s)",
    "run_elapsed(s)",
    "total_elapsed(s)",
];

/// Sink for timing rows. Every row is flushed as soon as it is written, so
/// an interrupted batch keeps the rows it already produced.
pub trait RecordWriter {
    fn write_record(&mut self, record: &TimingRecord) -> Result<()>;
}

pub struct CsvRecordWriter<W: Write> {
    wtr: csv::Writer<W>,
}

impl<W: Write> CsvRecordWriter<W> {
    /// Wraps `out` and writes the header row.
    pub fn new(out: W) -> Result<Self> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
        wtr.write_record(CSV_HEADER)?;
        wtr.flush()?;
        Ok(CsvRecordWriter { wtr })
    }

    pub fn into_inner(self) -> Result<W> {
        self.wtr
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()).into())
    }
}

impl<W: Write> RecordWriter for CsvRecordWriter<W> {
    fn write_record(&mut self, record: &TimingRecord) -> Result<()> {
        self.wtr.write_record(record.csv_fields())?;
        self.wtr.flush()?;
        Ok(())
    }
}

/// Newline-delimited JSON objects.
pub struct JsonLinesWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        JsonLinesWriter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordWriter for JsonLinesWriter<W> {
    fn write_record(&mut self, record: &TimingRecord) -> Result<()> {
        writeln!(self.out, "{}", record.to_json_line()?)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Opens `path` for writing in the requested format, creating parent
/// directories as needed.
pub fn open_writer(format: OutputFormat, path: &Path) -> Result<Box<dyn RecordWriter>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            exists_or_create_dir(parent)?;
        }
    }
    debug!("writing {:?} results to {}", format, path.display());
    let file = BufWriter::new(File::create(path)?);
    let writer: Box<dyn RecordWriter> = match format {
        OutputFormat::Csv => Box::new(CsvRecordWriter::new(file)?),
        OutputFormat::Json => Box::new(JsonLinesWriter::new(file)),
    };
    Ok(writer)
}

/// Fans every row out to several writers.
pub struct Tee(pub Vec<Box<dyn RecordWriter>>);

impl RecordWriter for Tee {
    fn write_record(&mut self, record: &TimingRecord) -> Result<()> {
        for w in self.0.iter_mut() {
            w.write_record(record)?;
        }
        Ok(())
    }
}
