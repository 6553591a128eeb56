use clap::{Args, Subcommand};
use cloudlet_client::{header::ForwardTarget, request::DeployType};
use cloudlet_client_lib::experiment::DEFAULT_PAYLOAD_KB;

use crate::cli_utils::parse_env_entry;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Deploy the application profile on the cloudlet
    Deploy {
        /// Deployment strategy: new, fwd, lm or fwdlm
        #[clap(default_value_t = DeployType::New)]
        deploy_type: DeployType,

        #[command(flatten)]
        options: DeployOptions,
    },

    /// Remove the application from the cloudlet
    Remove,

    /// Open an interactive session with the application
    Session {
        /// Where the application forwards the session after a migration, host[:port]
        #[clap(long)]
        fwd: Option<ForwardTarget>,

        /// Continue the previous session state instead of starting fresh
        #[clap(long, default_value_t = false)]
        resume: bool,
    },

    /// Send one message to the application and print the first answer
    Send {
        /// Message line, nothing is sent when omitted
        message: Option<String>,

        /// Forward target carried in the header, host[:port]
        #[clap(long)]
        fwd: Option<ForwardTarget>,

        /// Set the resume flag in the header
        #[clap(long, default_value_t = false)]
        resume: bool,

        /// Skip the session header
        #[clap(long, default_value_t = false)]
        no_header: bool,
    },

    /// Run a measurement against the application
    Experiment {
        #[command(subcommand)]
        experiment: Experiment,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Experiment {
    /// Deploy, then measure per-cycle latency over one session
    Speed {
        /// Deployment strategy; no deploy request is sent when omitted
        deploy_type: Option<DeployType>,

        /// Payload size in KB
        #[clap(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_PAYLOAD_KB as u32)]
        size_kb: u32,

        /// Cycle count, negative falls back to the default
        #[clap(short = 'n', long, allow_negative_numbers = true, default_value_t = 10)]
        count: i64,

        /// Compare every echoed byte instead of a sample
        #[clap(short = 'f', long, default_value_t = false)]
        full_check: bool,

        /// Skip waiting for the application after the deploy
        #[clap(short = 'W', long, default_value_t = false)]
        no_wait: bool,

        #[command(flatten)]
        options: DeployOptions,
    },

    /// Deploy, then measure streaming throughput for a fixed time
    Throughput {
        /// Deployment strategy; no deploy request is sent when omitted
        deploy_type: Option<DeployType>,

        /// Duration in seconds, non-positive falls back to the default
        #[clap(short = 't', long, allow_negative_numbers = true, default_value_t = 30)]
        duration: i64,

        /// Payload size in KB
        #[clap(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_PAYLOAD_KB as u32)]
        size_kb: u32,

        /// Skip waiting for the application after the deploy
        #[clap(short = 'W', long, default_value_t = false)]
        no_wait: bool,

        #[command(flatten)]
        options: DeployOptions,
    },

    /// Measure latency against an already running application
    Latency {
        /// Payload size in KB
        #[clap(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_PAYLOAD_KB as u32)]
        size_kb: u32,

        /// Cycle count, negative falls back to the default
        #[clap(short = 'n', long, allow_negative_numbers = true, default_value_t = 10)]
        count: i64,

        /// Compare every echoed byte instead of a sample
        #[clap(short = 'f', long, default_value_t = false)]
        full_check: bool,
    },

    /// Measure latency on this host, then on a second one that forwards the
    /// session back here
    Handoff {
        /// Host the session moves to
        second_host: String,

        /// Application port on the second host, defaults to the first one's
        #[clap(long)]
        second_port: Option<u16>,

        /// Payload size in KB
        #[clap(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = DEFAULT_PAYLOAD_KB as u32)]
        size_kb: u32,

        /// Cycle count per host, negative falls back to the default
        #[clap(short = 'n', long, allow_negative_numbers = true, default_value_t = 10)]
        count: i64,

        /// Compare every echoed byte instead of a sample
        #[clap(short = 'f', long, default_value_t = false)]
        full_check: bool,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct DeployOptions {
    /// Address of the instance to forward to or migrate from, host:port
    #[clap(short = 's', long)]
    pub src_addr: Option<String>,

    /// Container name on the source cloudlet
    #[clap(long)]
    pub src_name: Option<String>,

    /// Application port on the source cloudlet
    #[clap(long)]
    pub src_port: Option<u16>,

    /// Environment entry KEY=VALUE, repeatable
    #[clap(short = 'e', long = "env", value_parser = parse_env_entry)]
    pub env: Vec<(String, String)>,

    /// Migration destination address
    #[clap(short = 'd', long)]
    pub dst_addr: Option<String>,

    /// Migration bandwidth limit, 0 is unlimited
    #[clap(short = 'l', long)]
    pub bw_limit: Option<u32>,

    /// Pre-copy iterations
    #[clap(short = 'i', long)]
    pub iteration: Option<u32>,

    /// Forwarded data rate
    #[clap(short = 'r', long)]
    pub data_rate: Option<u32>,
}

#[cfg(test)]
mod test {
    use clap::Parser;
    use cloudlet_client::{header::ForwardTarget, request::DeployType};

    use super::{Command, DeployOptions, Experiment};

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        TestCli::try_parse_from(std::iter::once("cloudlet").chain(args.iter().copied()))
            .map(|cli| cli.command)
    }

    #[test]
    fn deploy_defaults_to_new() {
        assert_eq!(
            parse(&["deploy"]).unwrap(),
            Command::Deploy {
                deploy_type: DeployType::New,
                options: DeployOptions::default(),
            }
        );
    }

    #[test]
    fn deploy_lm_options() {
        let Command::Deploy {
            deploy_type,
            options,
        } = parse(&[
            "deploy", "lm", "-s", "10.0.0.5:9000", "-d", "10.0.0.6", "-l", "0", "-e", "SLEEP_MS=3",
        ])
        .unwrap()
        else {
            panic!("Expected deploy command");
        };
        assert_eq!(deploy_type, DeployType::Lm);
        assert_eq!(options.src_addr.as_deref(), Some("10.0.0.5:9000"));
        assert_eq!(options.dst_addr.as_deref(), Some("10.0.0.6"));
        assert_eq!(options.bw_limit, Some(0));
        assert_eq!(
            options.env,
            vec![(String::from("SLEEP_MS"), String::from("3"))]
        );
    }

    #[test]
    fn speed_experiment_flags() {
        assert_eq!(
            parse(&["experiment", "speed", "fwd", "-s", "10.0.0.5:30088", "-c", "4", "-n", "-1", "-f", "-W"])
                .unwrap(),
            Command::Experiment {
                experiment: Experiment::Speed {
                    deploy_type: Some(DeployType::Fwd),
                    size_kb: 4,
                    count: -1,
                    full_check: true,
                    no_wait: true,
                    options: DeployOptions {
                        src_addr: Some(String::from("10.0.0.5:30088")),
                        ..Default::default()
                    },
                },
            }
        );
    }

    #[test]
    fn session_flags() {
        assert_eq!(
            parse(&["session", "--fwd", "10.0.0.5:30088", "--resume"]).unwrap(),
            Command::Session {
                fwd: Some(ForwardTarget::new([10, 0, 0, 5].into(), 30088)),
                resume: true,
            }
        );
    }

    #[test]
    fn send_message() {
        assert_eq!(
            parse(&["send", "hello", "--no-header"]).unwrap(),
            Command::Send {
                message: Some(String::from("hello")),
                fwd: None,
                resume: false,
                no_header: true,
            }
        );
        assert!(matches!(
            parse(&["send"]).unwrap(),
            Command::Send { message: None, .. }
        ));
    }

    #[test]
    fn handoff_experiment_flags() {
        assert_eq!(
            parse(&["experiment", "handoff", "10.0.0.6", "--second-port", "30089", "-n", "3"])
                .unwrap(),
            Command::Experiment {
                experiment: Experiment::Handoff {
                    second_host: String::from("10.0.0.6"),
                    second_port: Some(30089),
                    size_kb: 1024,
                    count: 3,
                    full_check: false,
                },
            }
        );
    }

    #[test]
    fn latency_size_and_count_flags() {
        assert_eq!(
            parse(&["experiment", "latency", "-c", "8", "-n", "20"]).unwrap(),
            Command::Experiment {
                experiment: Experiment::Latency {
                    size_kb: 8,
                    count: 20,
                    full_check: false,
                },
            }
        );
    }

    #[test]
    fn invalid_arguments_rejected() {
        assert!(parse(&["deploy", "teleport"]).is_err());
        assert!(parse(&["experiment", "latency", "-c", "0"]).is_err());
        assert!(parse(&["deploy", "-e", "NO_VALUE"]).is_err());
    }
}
