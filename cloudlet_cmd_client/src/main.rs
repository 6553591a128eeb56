use std::{path::PathBuf, process};

use clap::Parser;
use cloudlet_client::{header::ProtocolVersion, request::RequestError};
use cloudlet_client_lib::{
    probe::ProbeError, CloudletClientError, CloudletController, DEFAULT_CONTROLLER_PORT,
};
use cmd_handler::CommandHandler;
use commands::Command;
use log::{error, info};
use profile::AppProfile;
use uuid::Uuid;

mod cmd_handler;
mod commands;
mod profile;
mod cli_utils;

const VALIDATION_EXIT_CODE: i32 = -1;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Cloudlet controller host, also serving the application port
    host: String,

    #[arg(long, default_value_t = DEFAULT_CONTROLLER_PORT)]
    controller_port: u16,

    /// Application port, defaults to the profile's external port
    #[arg(long)]
    app_port: Option<u16>,

    /// Session header layout: v1 (16 bytes) or v2 (21 bytes)
    #[arg(long, default_value_t = ProtocolVersion::V1)]
    protocol: ProtocolVersion,

    /// Session id, a fresh one per invocation when omitted
    #[arg(long)]
    session_id: Option<Uuid>,

    /// YAML application profile
    #[arg(long)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if !err.use_stderr() => {
            err.print()?;
            return Ok(());
        }
        Err(err) => {
            err.print()?;
            process::exit(VALIDATION_EXIT_CODE);
        }
    };

    let profile = AppProfile::load(args.profile.as_deref()).await?;
    let controller = CloudletController::new(args.host, args.controller_port);
    let mut handler = CommandHandler::new(
        controller,
        args.app_port,
        args.protocol,
        args.session_id,
        profile,
    );

    match handler.handle_command(args.command).await {
        Ok(()) => {
            info!("Command handled successfully.");
            Ok(())
        }
        Err(err) if is_validation_error(&err) => {
            error!("{err}");
            process::exit(VALIDATION_EXIT_CODE);
        }
        Err(err) => Err(err),
    }
}

fn is_validation_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RequestError>().is_some()
        || matches!(
            err.downcast_ref::<CloudletClientError>(),
            Some(
                CloudletClientError::InvalidRequest(_)
                    | CloudletClientError::ProbeFail(ProbeError::EmptyPayload)
            )
        )
}
