//! Reading output sinks
//!
//! Supports console output and durable append-only logs in several formats

use crate::core::poll::{CycleReport, ExchangeFailure, Reading};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Stderr, Stdout, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receives the results of each poll cycle
///
/// Calls arrive in order: `begin_cycle`, then one `emit` or
/// `report_failure` per parameter, then `end_cycle`.
pub trait ReadingSink {
    /// A cycle is starting
    fn begin_cycle(&mut self, _cycle: u64, _started_at: DateTime<Local>) -> io::Result<()> {
        Ok(())
    }

    /// A parameter was read successfully
    fn emit(&mut self, reading: &Reading) -> io::Result<()>;

    /// A parameter could not be read
    fn report_failure(&mut self, _failure: &ExchangeFailure) -> io::Result<()> {
        Ok(())
    }

    /// A cycle finished
    fn end_cycle(&mut self, _report: &CycleReport) -> io::Result<()> {
        Ok(())
    }
}

impl<S: ReadingSink + ?Sized> ReadingSink for Box<S> {
    fn begin_cycle(&mut self, cycle: u64, started_at: DateTime<Local>) -> io::Result<()> {
        (**self).begin_cycle(cycle, started_at)
    }

    fn emit(&mut self, reading: &Reading) -> io::Result<()> {
        (**self).emit(reading)
    }

    fn report_failure(&mut self, failure: &ExchangeFailure) -> io::Result<()> {
        (**self).report_failure(failure)
    }

    fn end_cycle(&mut self, report: &CycleReport) -> io::Result<()> {
        (**self).end_cycle(report)
    }
}

/// Fan out to every sink; all sinks see every call, the first error is returned
impl<S: ReadingSink> ReadingSink for Vec<S> {
    fn begin_cycle(&mut self, cycle: u64, started_at: DateTime<Local>) -> io::Result<()> {
        self.iter_mut()
            .map(|sink| sink.begin_cycle(cycle, started_at))
            .fold(Ok(()), Result::and)
    }

    fn emit(&mut self, reading: &Reading) -> io::Result<()> {
        self.iter_mut()
            .map(|sink| sink.emit(reading))
            .fold(Ok(()), Result::and)
    }

    fn report_failure(&mut self, failure: &ExchangeFailure) -> io::Result<()> {
        self.iter_mut()
            .map(|sink| sink.report_failure(failure))
            .fold(Ok(()), Result::and)
    }

    fn end_cycle(&mut self, report: &CycleReport) -> io::Result<()> {
        self.iter_mut()
            .map(|sink| sink.end_cycle(report))
            .fold(Ok(()), Result::and)
    }
}

/// Prints readings to one stream and diagnostics to another
pub struct ConsoleSink<O, E> {
    out: O,
    err: E,
}

impl ConsoleSink<Stdout, Stderr> {
    /// Readings to stdout, failures to stderr
    pub fn stdout() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> ConsoleSink<O, E> {
    /// Create a console sink over arbitrary writers
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    /// Release the writers
    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

impl<O: Write, E: Write> ReadingSink for ConsoleSink<O, E> {
    fn begin_cycle(&mut self, cycle: u64, _started_at: DateTime<Local>) -> io::Result<()> {
        writeln!(self.out, "\nReading sensor data... (cycle {cycle})")
    }

    fn emit(&mut self, reading: &Reading) -> io::Result<()> {
        writeln!(self.out, "{reading}")
    }

    fn report_failure(&mut self, failure: &ExchangeFailure) -> io::Result<()> {
        writeln!(self.err, "{failure}")
    }

    fn end_cycle(&mut self, _report: &CycleReport) -> io::Result<()> {
        self.out.flush()?;
        self.err.flush()
    }
}

/// Durable log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text, one delimited block per cycle
    #[default]
    Text,
    /// One JSON object per cycle
    #[serde(alias = "jsonl")]
    Json,
    /// One CSV row per reading
    Csv,
}

impl LogFormat {
    /// Get name
    pub fn name(&self) -> &'static str {
        match self {
            LogFormat::Text => "Text",
            LogFormat::Json => "JSON Lines",
            LogFormat::Csv => "CSV",
        }
    }

    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "log" => Some(LogFormat::Text),
            "json" | "jsonl" => Some(LogFormat::Json),
            "csv" => Some(LogFormat::Csv),
            _ => None,
        }
    }
}

const CSV_HEADER: &str = "timestamp,cycle,register,label,value,unit";

#[derive(Serialize)]
struct ReadingRecord<'a> {
    register: u8,
    label: &'a str,
    unit: &'a str,
    raw: i16,
    value: f32,
}

#[derive(Serialize)]
struct ErrorRecord<'a> {
    register: u8,
    label: &'a str,
    kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct CycleRecord<'a> {
    timestamp: String,
    cycle: u64,
    readings: Vec<ReadingRecord<'a>>,
    errors: Vec<ErrorRecord<'a>>,
}

impl<'a> From<&'a CycleReport> for CycleRecord<'a> {
    fn from(report: &'a CycleReport) -> Self {
        Self {
            timestamp: report.started_at.format(TIMESTAMP_FORMAT).to_string(),
            cycle: report.cycle,
            readings: report
                .readings
                .iter()
                .map(|r| ReadingRecord {
                    register: r.parameter.register_address,
                    label: &r.parameter.label,
                    unit: &r.parameter.unit,
                    raw: r.raw_value,
                    value: r.physical_value,
                })
                .collect(),
            errors: report
                .failures
                .iter()
                .map(|f| ErrorRecord {
                    register: f.parameter.register_address,
                    label: &f.parameter.label,
                    kind: f.error.kind(),
                    message: f.error.to_string(),
                })
                .collect(),
        }
    }
}

/// Appends cycle records to a file
pub struct FileSink {
    writer: BufWriter<File>,
    format: LogFormat,
    path: PathBuf,
    cycle: u64,
    started_at: Option<DateTime<Local>>,
}

impl FileSink {
    /// Open `path` for appending, creating it (and a CSV header) if needed
    pub fn open(path: impl AsRef<Path>, format: LogFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);

        if format == LogFormat::Csv && is_new {
            writeln!(writer, "{CSV_HEADER}")?;
            writer.flush()?;
        }

        tracing::debug!(path = %path.display(), format = format.name(), "Opened reading log");

        Ok(Self {
            writer,
            format,
            path,
            cycle: 0,
            started_at: None,
        })
    }

    /// Log path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log format
    pub fn format(&self) -> LogFormat {
        self.format
    }

    fn timestamp(&self) -> String {
        self.started_at
            .unwrap_or_else(Local::now)
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }
}

impl ReadingSink for FileSink {
    fn begin_cycle(&mut self, cycle: u64, started_at: DateTime<Local>) -> io::Result<()> {
        self.cycle = cycle;
        self.started_at = Some(started_at);

        if self.format == LogFormat::Text {
            let stamp = self.timestamp();
            writeln!(self.writer, "\nNew Data Poll: {stamp} (cycle {cycle})")?;
        }
        Ok(())
    }

    fn emit(&mut self, reading: &Reading) -> io::Result<()> {
        match self.format {
            LogFormat::Text => writeln!(self.writer, "{reading}"),
            LogFormat::Csv => {
                let stamp = self.timestamp();
                writeln!(
                    self.writer,
                    "{},{},{},{},{},{}",
                    stamp,
                    self.cycle,
                    reading.parameter.register_address,
                    csv_field(&reading.parameter.label),
                    reading.physical_value,
                    csv_field(&reading.parameter.unit)
                )
            }
            // Written whole at end of cycle
            LogFormat::Json => Ok(()),
        }
    }

    fn report_failure(&mut self, failure: &ExchangeFailure) -> io::Result<()> {
        if self.format == LogFormat::Text {
            writeln!(self.writer, "{failure}")?;
        }
        Ok(())
    }

    fn end_cycle(&mut self, report: &CycleReport) -> io::Result<()> {
        if self.format == LogFormat::Json {
            let line = serde_json::to_string(&CycleRecord::from(report))?;
            writeln!(self.writer, "{line}")?;
        }
        self.writer.flush()
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::poll::ExchangeError;
    use crate::core::registry::ParameterRegistry;
    use crate::core::transport::TransportError;

    fn sample_report() -> CycleReport {
        let registry = ParameterRegistry::standard();
        let params = registry.parameters();
        CycleReport {
            cycle: 3,
            started_at: Local::now(),
            readings: vec![
                Reading {
                    parameter: params[0].clone(),
                    raw_value: 123,
                    physical_value: 12.3,
                },
                Reading {
                    parameter: params[2].clone(),
                    raw_value: 700,
                    physical_value: 700.0,
                },
            ],
            failures: vec![ExchangeFailure {
                parameter: params[1].clone(),
                error: ExchangeError::Transport(TransportError::ReadFailed {
                    received: 0,
                    expected: 7,
                    reason: "timed out".to_string(),
                }),
            }],
        }
    }

    fn replay<S: ReadingSink>(sink: &mut S, report: &CycleReport) {
        sink.begin_cycle(report.cycle, report.started_at).unwrap();
        sink.emit(&report.readings[0]).unwrap();
        sink.report_failure(&report.failures[0]).unwrap();
        sink.emit(&report.readings[1]).unwrap();
        sink.end_cycle(report).unwrap();
    }

    #[test]
    fn test_console_sink() {
        let report = sample_report();
        let mut sink = ConsoleSink::new(Vec::new(), Vec::new());
        replay(&mut sink, &report);

        let (out, err) = sink.into_inner();
        let out = String::from_utf8(out).unwrap();
        let err = String::from_utf8(err).unwrap();

        assert!(out.contains("(cycle 3)"));
        assert!(out.contains("Moisture: 12.3 %\n"));
        assert!(out.contains("Conductivity: 700 uS/cm\n"));
        assert!(err.starts_with("Error reading Temperature (register 0x01): Read failed"));
    }

    #[test]
    fn test_text_log_appends_delimited_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.txt");
        let report = sample_report();

        {
            let mut sink = FileSink::open(&path, LogFormat::Text).unwrap();
            replay(&mut sink, &report);
        }
        {
            let mut sink = FileSink::open(&path, LogFormat::Text).unwrap();
            replay(&mut sink, &report);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("New Data Poll:").count(), 2);
        assert_eq!(content.matches("Moisture: 12.3 %").count(), 2);
        assert!(content.contains("Error reading Temperature"));
    }

    #[test]
    fn test_json_log_one_record_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soil_data.jsonl");
        let report = sample_report();

        let mut sink = FileSink::open(&path, LogFormat::Json).unwrap();
        assert_eq!(sink.path(), path.as_path());
        assert_eq!(sink.format(), LogFormat::Json);
        replay(&mut sink, &report);
        replay(&mut sink, &report);
        drop(sink);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["cycle"], 3);
        assert_eq!(record["readings"][0]["label"], "Moisture");
        assert_eq!(record["readings"][0]["raw"], 123);
        assert_eq!(record["readings"][1]["value"], 700.0);
        assert_eq!(record["errors"][0]["kind"], "read_failed");
        assert_eq!(record["errors"][0]["register"], 1);
    }

    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("soil.csv");
        let report = sample_report();

        for _ in 0..2 {
            let mut sink = FileSink::open(&path, LogFormat::Csv).unwrap();
            replay(&mut sink, &report);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 5);
        assert!(lines[1].ends_with(",3,0,Moisture,12.3,%"));
        assert!(lines[2].ends_with(",3,2,Conductivity,700,uS/cm"));
    }

    #[test]
    fn test_fan_out() {
        let report = sample_report();
        let mut sinks = vec![
            ConsoleSink::new(Vec::new(), Vec::new()),
            ConsoleSink::new(Vec::new(), Vec::new()),
        ];
        replay(&mut sinks, &report);

        for sink in sinks {
            let (out, _) = sink.into_inner();
            assert!(String::from_utf8(out).unwrap().contains("Moisture: 12.3 %"));
        }
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("uS/cm"), "uS/cm");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(LogFormat::from_path(Path::new("soil.JSONL")), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_path(Path::new("out/soil.csv")), Some(LogFormat::Csv));
        assert_eq!(LogFormat::from_path(Path::new("sensor_data.txt")), Some(LogFormat::Text));
        assert_eq!(LogFormat::from_path(Path::new("data")), None);
    }
}
