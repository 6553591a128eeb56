use cloudlet_client::{
    header::{ProtocolVersion, SessionHeader},
    request::{DeployParams, DeployRequest, DeployType, PortMap, RemoveRequest},
};
use cloudlet_client_lib::{
    experiment::{
        run_experiment, run_handoff, ExperimentPlan, HandoffPlan, EXPERIMENT_SESSION_ID,
    },
    probe::{payload::IntegrityCheck, ProbeConfig, ProbeMode},
    session::SessionForwarder,
    console::stdin_lines,
    CloudletController, Console, ControllerAck,
};
use log::{info, warn};
use utils::net::send_recv_with_prefix;
use uuid::Uuid;

use crate::{
    commands::{Command, DeployOptions, Experiment},
    profile::AppProfile,
};

enum PlannedExperiment {
    Single(ExperimentPlan),
    Handoff(HandoffPlan),
}

pub struct CommandHandler {
    controller: CloudletController,
    app_port: u16,
    protocol: ProtocolVersion,
    session_id: Option<Uuid>,
    profile: AppProfile,
}

impl CommandHandler {
    pub fn new(
        controller: CloudletController,
        app_port: Option<u16>,
        protocol: ProtocolVersion,
        session_id: Option<Uuid>,
        profile: AppProfile,
    ) -> Self {
        Self {
            app_port: app_port.unwrap_or(profile.external_port),
            controller,
            protocol,
            session_id,
            profile,
        }
    }

    pub async fn handle_command(&mut self, command: Command) -> Result<(), anyhow::Error> {
        match command {
            Command::Deploy {
                deploy_type,
                options,
            } => {
                let request = self.deploy_request(deploy_type, options)?;
                let ack = self.controller.deploy(request).await?;
                report_ack(&ack);
                Ok(())
            }
            Command::Remove => {
                let ack = self
                    .controller
                    .remove(RemoveRequest::new(self.profile.name.clone()))
                    .await?;
                report_ack(&ack);
                Ok(())
            }
            Command::Session { fwd, resume } => {
                let session_id = self.session_id.unwrap_or_else(Uuid::new_v4);
                let header = SessionHeader::new(session_id)
                    .with_forward(fwd)
                    .with_resume(resume);
                let mut forwarder = SessionForwarder::new(header, self.protocol, Console::stdout());
                let summary = forwarder
                    .connect_and_run(self.controller.host(), self.app_port, stdin_lines())
                    .await?;
                info!(
                    "Session {session_id} closed ({:?}): sent {} lines, received {} chunks",
                    summary.close_reason, summary.sent_lines, summary.received_chunks
                );
                Ok(())
            }
            Command::Send {
                message,
                fwd,
                resume,
                no_header,
            } => {
                let header = (!no_header).then(|| {
                    SessionHeader::new(self.session_id.unwrap_or_else(Uuid::new_v4))
                        .with_forward(fwd)
                        .with_resume(resume)
                });
                self.send_message(header, message.as_deref()).await?;
                Ok(())
            }
            Command::Experiment { experiment } => {
                let inconsistent = match self.experiment_plan(experiment)? {
                    PlannedExperiment::Single(plan) => {
                        let outcome =
                            run_experiment(&self.controller, plan, Console::stdout()).await?;
                        outcome.report.inconsistent
                    }
                    PlannedExperiment::Handoff(plan) => {
                        let outcome = run_handoff(plan, Console::stdout()).await?;
                        outcome.first.inconsistent + outcome.second.inconsistent
                    }
                };
                if inconsistent > 0 {
                    warn!("{inconsistent} inconsistent cycles");
                }
                Ok(())
            }
        }
    }

    async fn send_message(
        &self,
        header: Option<SessionHeader>,
        message: Option<&str>,
    ) -> Result<Vec<u8>, anyhow::Error> {
        let header = match header {
            Some(header) => {
                info!("Header: {header}");
                Some(header.encode(self.protocol)?)
            }
            None => None,
        };
        let response = send_recv_with_prefix(
            self.controller.host(),
            self.app_port,
            header.as_deref(),
            message,
        )
        .await?;
        Ok(response)
    }

    fn experiment_plan(&self, experiment: Experiment) -> Result<PlannedExperiment, anyhow::Error> {
        let plan = match experiment {
            Experiment::Speed {
                deploy_type,
                size_kb,
                count,
                full_check,
                no_wait,
                options,
            } => ExperimentPlan::speed(
                self.optional_deploy_request(deploy_type, options)?,
                self.probe_config(size_kb, ProbeMode::Latency)?,
                count,
                integrity_check(full_check),
            )
            .with_wait(!no_wait),
            Experiment::Throughput {
                deploy_type,
                duration,
                size_kb,
                no_wait,
                options,
            } => ExperimentPlan::throughput(
                self.optional_deploy_request(deploy_type, options)?,
                self.probe_config(size_kb, ProbeMode::Throughput)?,
                duration,
            )
            .with_wait(!no_wait),
            Experiment::Latency {
                size_kb,
                count,
                full_check,
            } => ExperimentPlan::latency(
                self.probe_config(size_kb, ProbeMode::Latency)?,
                count,
                integrity_check(full_check),
            ),
            Experiment::Handoff {
                second_host,
                second_port,
                size_kb,
                count,
                full_check,
            } => {
                return self.handoff_plan(second_host, second_port, size_kb, count, full_check);
            }
        };
        Ok(PlannedExperiment::Single(plan))
    }

    fn handoff_plan(
        &self,
        second_host: String,
        second_port: Option<u16>,
        size_kb: u32,
        count: i64,
        full_check: bool,
    ) -> Result<PlannedExperiment, anyhow::Error> {
        if self.protocol == ProtocolVersion::V1 {
            warn!("Protocol v1 headers can't carry the forward target");
        }
        let payload_size = size_kb as usize * 1024;
        let first = ProbeConfig::new(
            self.controller.host(),
            self.app_port,
            payload_size,
            ProbeMode::Latency,
        )
        .with_integrity(integrity_check(full_check));
        let second = ProbeConfig::new(
            second_host,
            second_port.unwrap_or(self.app_port),
            payload_size,
            ProbeMode::Latency,
        )
        .with_integrity(integrity_check(full_check));
        let plan = HandoffPlan::new(
            self.session_id.unwrap_or(EXPERIMENT_SESSION_ID),
            self.protocol,
            first,
            second,
            count,
        )?;
        Ok(PlannedExperiment::Handoff(plan))
    }

    fn probe_config(&self, size_kb: u32, mode: ProbeMode) -> Result<ProbeConfig, anyhow::Error> {
        let header = SessionHeader::new(self.session_id.unwrap_or(EXPERIMENT_SESSION_ID))
            .encode(self.protocol)?;
        let payload_size = size_kb as usize * 1024;
        Ok(
            ProbeConfig::new(self.controller.host(), self.app_port, payload_size, mode)
                .with_header(Some(header)),
        )
    }

    fn optional_deploy_request(
        &self,
        deploy_type: Option<DeployType>,
        options: DeployOptions,
    ) -> Result<Option<DeployRequest>, anyhow::Error> {
        deploy_type
            .map(|deploy_type| self.deploy_request(deploy_type, options))
            .transpose()
    }

    fn deploy_request(
        &self,
        deploy_type: DeployType,
        options: DeployOptions,
    ) -> Result<DeployRequest, anyhow::Error> {
        let mut env = self.profile.env.clone();
        env.extend(options.env);
        let params = DeployParams {
            name: self.profile.name.clone(),
            image: self.profile.image.clone(),
            port: PortMap::new(self.profile.internal_port, self.app_port),
            env,
            src_addr: options.src_addr,
            src_name: options.src_name,
            src_port: options.src_port,
            dst_addr: options.dst_addr,
            bw_limit: options.bw_limit,
            iteration: options.iteration,
            data_rate: options.data_rate,
        };
        Ok(DeployRequest::build(deploy_type, params)?)
    }
}

fn integrity_check(full_check: bool) -> IntegrityCheck {
    if full_check {
        IntegrityCheck::Full
    } else {
        IntegrityCheck::Sampled
    }
}

fn report_ack(ack: &ControllerAck) {
    match ack {
        ControllerAck::Empty => info!("Controller closed without answer"),
        ControllerAck::Response(response) if response.ok => info!("Controller accepted: {}", response.msg),
        ControllerAck::Response(response) => warn!("Controller refused: {}", response.msg),
        ControllerAck::Text(text) => info!("Controller answered: {text}"),
    }
}
