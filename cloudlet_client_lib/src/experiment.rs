use std::{
    io,
    time::{Duration, Instant},
};

use cloudlet_client::{
    header::{ForwardTarget, HeaderError, ProtocolVersion, SessionHeader},
    request::DeployRequest,
};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use utils::net::{connect, TransportError, RECV_BUFFER_SIZE};
use uuid::Uuid;

use crate::{
    cloudlet_client_error::CloudletClientError,
    console::Console,
    probe::{
        meter::Sampling, payload::IntegrityCheck, Probe, ProbeConfig, ProbeError, ProbeMode,
        ProbeReport, StopCondition,
    },
    CloudletController,
};

/// Session id shared by every experiment run so the application can
/// correlate runs across migrations.
pub const EXPERIMENT_SESSION_ID: Uuid = Uuid::from_u128(0x55C497AC_8AD5_4DA1_8673_6199443AE137);
pub const DEFAULT_PAYLOAD_KB: usize = 1024;
pub const READINESS_MESSAGE: &[u8] = b"Hello_world ABCD";
pub const READINESS_RETRY: Duration = Duration::from_millis(100);
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    Speed,
    Throughput,
    Latency,
}

impl ExperimentKind {
    fn title(&self) -> &'static str {
        match self {
            ExperimentKind::Speed => "Speed",
            ExperimentKind::Throughput => "Throughput",
            ExperimentKind::Latency => "Latency",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub kind: ExperimentKind,
    pub deploy: Option<DeployRequest>,
    pub wait_for_app: bool,
    pub readiness_timeout: Duration,
    pub probe: ProbeConfig,
}

impl ExperimentPlan {
    /// Deploy, then `count` latency cycles over one session.
    pub fn speed(
        deploy: Option<DeployRequest>,
        probe: ProbeConfig,
        count: i64,
        integrity: IntegrityCheck,
    ) -> Self {
        let probe = ProbeConfig {
            mode: ProbeMode::Latency,
            ..probe
        }
        .with_stop(StopCondition::cycles(count))
        .with_sampling(Sampling::EveryCycles(1))
        .with_integrity(integrity);
        Self::new(ExperimentKind::Speed, deploy, probe)
    }

    /// Deploy, then stream for `duration_secs` sampling fixed time slices.
    pub fn throughput(deploy: Option<DeployRequest>, probe: ProbeConfig, duration_secs: i64) -> Self {
        let probe = ProbeConfig {
            mode: ProbeMode::Throughput,
            ..probe
        }
        .with_stop(StopCondition::elapsed_secs(duration_secs))
        .with_sampling(Sampling::default());
        Self::new(ExperimentKind::Throughput, deploy, probe)
    }

    /// Latency cycles against an application that is already running. No
    /// header is sent.
    pub fn latency(probe: ProbeConfig, count: i64, integrity: IntegrityCheck) -> Self {
        let probe = ProbeConfig {
            mode: ProbeMode::Latency,
            ..probe
        }
        .with_stop(StopCondition::cycles(count))
        .with_sampling(Sampling::EveryCycles(1))
        .with_integrity(integrity)
        .with_header(None);
        Self::new(ExperimentKind::Latency, None, probe)
    }

    pub fn with_wait(mut self, wait_for_app: bool) -> Self {
        self.wait_for_app = wait_for_app && self.deploy.is_some();
        self
    }

    fn new(kind: ExperimentKind, deploy: Option<DeployRequest>, probe: ProbeConfig) -> Self {
        Self {
            kind,
            wait_for_app: deploy.is_some(),
            deploy,
            readiness_timeout: READINESS_TIMEOUT,
            probe,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentOutcome {
    pub deploy_time: Option<Duration>,
    pub report: ProbeReport,
}

pub async fn run_experiment<W: AsyncWrite + Unpin + Send>(
    controller: &CloudletController,
    plan: ExperimentPlan,
    console: Console<W>,
) -> Result<ExperimentOutcome, CloudletClientError> {
    let title = plan.kind.title();
    let mut probe = Probe::new(plan.probe.clone(), console.clone())?;

    say(&console, format!("--- {title} test start ---")).await?;
    let started = Instant::now();
    let mut deploy_time = None;
    if let Some(request) = plan.deploy {
        say(&console, "Send deploy request to Cloudlet Controller").await?;
        controller.deploy(request).await?;
        if plan.wait_for_app {
            wait_until_ready(
                &plan.probe.host,
                plan.probe.port,
                plan.probe.header.as_deref(),
                READINESS_RETRY,
                plan.readiness_timeout,
            )
            .await?;
        }
        let elapsed = started.elapsed();
        say(&console, format!("Deploy time (ms): {}", elapsed.as_millis())).await?;
        deploy_time = Some(elapsed);
    }

    let report = probe.run().await?;
    say(&console, format!("--- {title} test finish ---")).await?;
    if deploy_time.is_some() {
        say(
            &console,
            format!(
                "May clean up the server: run with args: remove {}",
                controller.host()
            ),
        )
        .await?;
    }
    Ok(ExperimentOutcome {
        deploy_time,
        report,
    })
}

/// The same session probed on two hosts in turn: first on `first` with a
/// plain header, then on `second` with a header that names `first` as the
/// forward target.
#[derive(Debug, Clone)]
pub struct HandoffPlan {
    pub first: ProbeConfig,
    pub second: ProbeConfig,
}

impl HandoffPlan {
    pub fn new(
        session_id: Uuid,
        version: ProtocolVersion,
        first: ProbeConfig,
        second: ProbeConfig,
        count: i64,
    ) -> Result<Self, HeaderError> {
        let header = SessionHeader::new(session_id);
        let forward = ForwardTarget::resolve(&first.host, first.port)?;
        let latency = |probe: ProbeConfig, header: SessionHeader| -> Result<ProbeConfig, HeaderError> {
            Ok(ProbeConfig {
                mode: ProbeMode::Latency,
                ..probe
            }
            .with_stop(StopCondition::cycles(count))
            .with_sampling(Sampling::EveryCycles(1))
            .with_header(Some(header.encode(version)?)))
        };
        Ok(Self {
            first: latency(first, header)?,
            second: latency(second, header.with_forward(Some(forward)))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandoffOutcome {
    pub first: ProbeReport,
    pub second: ProbeReport,
}

pub async fn run_handoff<W: AsyncWrite + Unpin + Send>(
    plan: HandoffPlan,
    console: Console<W>,
) -> Result<HandoffOutcome, CloudletClientError> {
    let mut first = Probe::new(plan.first.clone(), console.clone())?;
    let mut second = Probe::new(plan.second.clone(), console.clone())?;

    say(&console, "--- Handoff test start ---").await?;
    say(
        &console,
        format!("# --> Server A {}:{}", plan.first.host, plan.first.port),
    )
    .await?;
    let first = first.run().await?;
    say(
        &console,
        format!("# --> Server B {}:{}", plan.second.host, plan.second.port),
    )
    .await?;
    let second = second.run().await?;
    say(&console, "--- Handoff test finish ---").await?;
    Ok(HandoffOutcome { first, second })
}

async fn say<W: AsyncWrite + Unpin + Send>(
    console: &Console<W>,
    line: impl AsRef<str>,
) -> Result<(), CloudletClientError> {
    console
        .println(line)
        .await
        .map_err(|err| ProbeError::ReportWriteFailed(err).into())
}

/// Polls the application port until a test message comes back. Refused,
/// reset and silently closed connections are retried every `retry` until
/// `timeout` passes. An attempt still waiting for the echo at that point is
/// abandoned.
pub async fn wait_until_ready(
    host: &str,
    port: u16,
    header: Option<&[u8]>,
    retry: Duration,
    timeout: Duration,
) -> Result<u32, CloudletClientError> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let attempt = probe_readiness(host, port, header);
        let Ok(result) = tokio::time::timeout_at(deadline.into(), attempt).await else {
            debug!("Application did not answer before the deadline");
            return Err(not_ready(host, port, timeout));
        };
        match result {
            Ok(echoed) if !echoed.is_empty() => {
                if echoed == READINESS_MESSAGE {
                    info!("OK: wrote: {}", String::from_utf8_lossy(READINESS_MESSAGE));
                } else {
                    warn!(
                        "FAIL: wrote: {}, read: {}",
                        String::from_utf8_lossy(READINESS_MESSAGE),
                        String::from_utf8_lossy(&echoed)
                    );
                }
                return Ok(attempts);
            }
            Ok(_) => debug!("Application closed the connection, retrying"),
            Err(err) => debug!("Application not reachable yet: {err}"),
        }
        if Instant::now() + retry > deadline {
            return Err(not_ready(host, port, timeout));
        }
        tokio::time::sleep(retry).await;
    }
}

fn not_ready(host: &str, port: u16, waited: Duration) -> CloudletClientError {
    CloudletClientError::ApplicationNotReady {
        address: format!("{host}:{port}"),
        waited,
    }
}

async fn probe_readiness(
    host: &str,
    port: u16,
    header: Option<&[u8]>,
) -> Result<Vec<u8>, TransportError> {
    let mut stream = connect(host, port).await?;
    let exchange = async {
        if let Some(header) = header {
            stream.write_all(header).await?;
        }
        stream.write_all(READINESS_MESSAGE).await?;
        stream.flush().await?;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let count = stream.read(&mut buf).await?;
        buf.truncate(count);
        Ok::<_, io::Error>(buf)
    };
    exchange
        .await
        .map_err(|source| TransportError::ExchangeFailed {
            address: format!("{host}:{port}"),
            source,
        })
}
