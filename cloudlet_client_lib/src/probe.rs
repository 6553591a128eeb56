pub mod meter;
pub mod payload;
pub mod report;

use std::{
    io,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use utils::net::{connect, TransportError};

use crate::console::Console;
use meter::{RateMeter, RateSample, Sampling};
use payload::{Integrity, IntegrityCheck, Payload};
use report::ReportWriter;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_CYCLES: u32 = 10;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_ERRORS: u32 = 50;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Payload size must be positive")]
    EmptyPayload,
    #[error("Failed to write report line")]
    ReportWriteFailed(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    Latency,
    Throughput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    Elapsed(Duration),
    Cycles(u32),
}

impl StopCondition {
    /// Non-positive durations fall back to [`DEFAULT_DURATION`].
    pub fn elapsed_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) if secs > 0 => StopCondition::Elapsed(Duration::from_secs(secs)),
            _ => StopCondition::Elapsed(DEFAULT_DURATION),
        }
    }

    /// Negative counts fall back to [`DEFAULT_CYCLES`].
    pub fn cycles(count: i64) -> Self {
        match u32::try_from(count) {
            Ok(count) => StopCondition::Cycles(count),
            Err(_) if count > 0 => StopCondition::Cycles(u32::MAX),
            Err(_) => StopCondition::Cycles(DEFAULT_CYCLES),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub host: String,
    pub port: u16,
    pub payload_size: usize,
    pub mode: ProbeMode,
    pub stop: StopCondition,
    pub sampling: Sampling,
    pub integrity: IntegrityCheck,
    pub backoff: Duration,
    /// Written once at the start of every connection, before the handshake.
    pub header: Option<Vec<u8>>,
    /// Only applies to [`StopCondition::Cycles`]; timed runs retry until the
    /// deadline.
    pub max_errors: u32,
}

impl ProbeConfig {
    pub fn new(host: impl Into<String>, port: u16, payload_size: usize, mode: ProbeMode) -> Self {
        let (stop, sampling) = match mode {
            ProbeMode::Latency => (StopCondition::Cycles(DEFAULT_CYCLES), Sampling::EveryCycles(1)),
            ProbeMode::Throughput => (StopCondition::Elapsed(DEFAULT_DURATION), Sampling::default()),
        };
        Self {
            host: host.into(),
            port,
            payload_size,
            mode,
            stop,
            sampling,
            integrity: IntegrityCheck::default(),
            backoff: DEFAULT_BACKOFF,
            header: None,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }

    pub fn with_stop(mut self, stop: StopCondition) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_integrity(mut self, integrity: IntegrityCheck) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_header(mut self, header: Option<Vec<u8>>) -> Self {
        self.header = header;
        self
    }

    pub fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub cycles: u32,
    pub consistent: u32,
    pub inconsistent: u32,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub samples: Vec<RateSample>,
}

#[derive(Debug, Error)]
enum RoundError {
    #[error(transparent)]
    Connect(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Report(#[from] ProbeError),
}

/// Pushes the payload through the echo application until the stop condition
/// holds. Lost connections are counted and reopened.
pub struct Probe<W> {
    config: ProbeConfig,
    report: ReportWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> Probe<W> {
    pub fn new(config: ProbeConfig, console: Console<W>) -> Result<Self, ProbeError> {
        if config.payload_size == 0 {
            return Err(ProbeError::EmptyPayload);
        }
        let report = ReportWriter::new(console, config.mode);
        Ok(Self { config, report })
    }

    pub async fn run(&mut self) -> Result<ProbeReport, ProbeError> {
        let mut payload = Payload::generate(self.config.payload_size);
        let origin = Instant::now();
        let deadline = match self.config.stop {
            StopCondition::Elapsed(duration) => Some(origin + duration),
            StopCondition::Cycles(_) => None,
        };
        let mut meter = RateMeter::new(self.config.sampling, origin);
        let mut stats = ProbeReport::default();

        info!(
            "Probe {}:{} with {} byte payload, {:?}",
            self.config.host, self.config.port, payload.len(), self.config.stop
        );
        self.report.heading().await?;

        while !self.finished(&stats, deadline) {
            let round = self.connection_round(&mut payload, &mut meter, &mut stats, deadline);
            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline.into(), round).await {
                    Ok(result) => result,
                    Err(_) => break,
                },
                None => round.await,
            };

            let err = match result {
                Ok(()) => break,
                Err(RoundError::Report(err)) => return Err(err),
                Err(err) => err,
            };
            warn!("Connection lost: {err}");
            let sample = meter.boundary(Instant::now());
            self.report.sample(&sample).await?;
            stats.samples.push(sample);
            stats.error_count += 1;
            stats.last_error = Some(err.to_string());

            if deadline.is_none() && stats.error_count >= self.config.max_errors {
                warn!("Giving up after {} errors", stats.error_count);
                break;
            }
            tokio::time::sleep(self.config.backoff).await;
        }

        self.report
            .summary(&stats, self.config.integrity == IntegrityCheck::Full)
            .await?;
        Ok(stats)
    }

    fn finished(&self, stats: &ProbeReport, deadline: Option<Instant>) -> bool {
        match self.config.stop {
            StopCondition::Cycles(cycles) => stats.cycles >= cycles,
            StopCondition::Elapsed(_) => deadline.map_or(true, |deadline| Instant::now() >= deadline),
        }
    }

    /// One connection's worth of cycles. Returns `Ok` only when the stop
    /// condition is reached.
    async fn connection_round(
        &self,
        payload: &mut Payload,
        meter: &mut RateMeter,
        stats: &mut ProbeReport,
        deadline: Option<Instant>,
    ) -> Result<(), RoundError> {
        let mut stream = connect(&self.config.host, self.config.port).await?;
        stream.set_nodelay(true)?;
        debug!("Connection open: {}:{}", self.config.host, self.config.port);

        if let Some(header) = &self.config.header {
            stream.write_all(header).await?;
        }
        handshake(&mut stream, payload.bytes()[0]).await?;
        meter.restart(Instant::now());

        let mut echo = vec![0u8; payload.len()];
        while !self.finished(stats, deadline) {
            let start = Instant::now();
            echo_cycle(&mut stream, payload.bytes(), &mut echo).await?;
            let now = Instant::now();
            stats.cycles += 1;

            match payload.verify(&echo, self.config.integrity) {
                Integrity::Consistent => stats.consistent += 1,
                mismatch => {
                    warn!("{mismatch}");
                    stats.inconsistent += 1;
                }
            }

            let latency = (self.config.mode == ProbeMode::Latency).then(|| now - start);
            if let Some(sample) = meter.record(echo.len(), latency, now) {
                self.report.sample(&sample).await?;
                stats.samples.push(sample);
            }
        }
        Ok(())
    }
}

async fn handshake(stream: &mut TcpStream, probe: u8) -> io::Result<()> {
    stream.write_all(&[probe]).await?;
    stream.flush().await?;
    let mut echo = [0u8; 1];
    stream.read_exact(&mut echo).await?;
    Ok(())
}

/// Writes the payload while reading its echo so neither side's buffers fill
/// up. A short echo surfaces as `UnexpectedEof`.
async fn echo_cycle(stream: &mut TcpStream, payload: &[u8], echo: &mut [u8]) -> io::Result<()> {
    let (mut reader, mut writer) = stream.split();
    let send = async {
        writer.write_all(payload).await?;
        writer.flush().await
    };
    tokio::try_join!(send, reader.read_exact(echo))?;
    Ok(())
}
