use tokio::io::AsyncWrite;

use super::{meter::RateSample, ProbeError, ProbeMode, ProbeReport};
use crate::console::Console;

/// Tab separated measurement lines. Rates are always Mbps.
pub struct ReportWriter<W> {
    console: Console<W>,
    mode: ProbeMode,
}

impl<W: AsyncWrite + Unpin + Send> ReportWriter<W> {
    pub fn new(console: Console<W>, mode: ProbeMode) -> Self {
        Self { console, mode }
    }

    pub async fn heading(&self) -> Result<(), ProbeError> {
        let heading = match self.mode {
            ProbeMode::Latency => "Time(s)\tLatency(ms)\tThruput(Mbps)",
            ProbeMode::Throughput => "Time(s)\tThruput(Mbps)",
        };
        self.line(heading).await
    }

    pub async fn sample(&self, sample: &RateSample) -> Result<(), ProbeError> {
        let line = match self.mode {
            ProbeMode::Latency => format!(
                "{:.3}\t{}\t{:.6}",
                sample.timestamp_secs,
                sample.latency.map_or(0, |latency| latency.as_millis()),
                sample.mbps
            ),
            ProbeMode::Throughput => format!("{:.3}\t{:.6}", sample.timestamp_secs, sample.mbps),
        };
        self.line(line).await
    }

    pub async fn summary(&self, report: &ProbeReport, full_check: bool) -> Result<(), ProbeError> {
        self.line(format!(
            "Test result: consistent: {}, inconsistent: {}, full-check: {full_check}",
            report.consistent, report.inconsistent
        ))
        .await?;
        self.line(format!("Error count: {}", report.error_count))
            .await?;
        if let Some(last_error) = &report.last_error {
            self.line(format!("Last Error: {last_error}")).await?;
        }
        Ok(())
    }

    pub async fn line(&self, line: impl AsRef<str>) -> Result<(), ProbeError> {
        self.console
            .println(line)
            .await
            .map_err(ProbeError::ReportWriteFailed)
    }
}
