use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("type is {deploy_type} but srcAddr is empty")]
    MissingSourceAddress { deploy_type: DeployType },
    #[error("type is {deploy_type} but image is empty")]
    MissingImage { deploy_type: DeployType },
    #[error("Application name is empty")]
    EmptyName,
    #[error("Unknown deploy type: {0}")]
    UnknownDeployType(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    New,
    Fwd,
    Lm,
    FwdLm,
}

impl DeployType {
    pub fn requires_source(&self) -> bool {
        !matches!(self, DeployType::New)
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployType::New => write!(f, "NEW"),
            DeployType::Fwd => write!(f, "FWD"),
            DeployType::Lm => write!(f, "LM"),
            DeployType::FwdLm => write!(f, "FWDLM"),
        }
    }
}

impl FromStr for DeployType {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(DeployType::New),
            "fwd" => Ok(DeployType::Fwd),
            "lm" => Ok(DeployType::Lm),
            "fwdlm" => Ok(DeployType::FwdLm),
            other => Err(RequestError::UnknownDeployType(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PortMap {
    #[serde(rename = "in")]
    pub internal: u16,
    #[serde(rename = "ext")]
    pub external: u16,
}

impl PortMap {
    pub fn new(internal: u16, external: u16) -> Self {
        Self { internal, external }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewApp {
    pub image: String,
    pub port: PortMap,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Forward {
    pub src_addr: String,
    pub port: PortMap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LiveMigration {
    pub image: String,
    pub src_addr: String,
    pub src_name: String,
    pub port: PortMap,
    pub dst_addr: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    /// Migration bandwidth cap, 0 means unlimited.
    pub bw_limit: Option<u32>,
    pub iteration: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardLiveMigration {
    pub image: String,
    pub src_addr: String,
    pub src_name: String,
    pub src_port: u16,
    pub port: PortMap,
    pub dst_addr: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub bw_limit: Option<u32>,
    pub iteration: Option<u32>,
    pub data_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStrategy {
    New(NewApp),
    Fwd(Forward),
    Lm(LiveMigration),
    FwdLm(ForwardLiveMigration),
}

impl DeployStrategy {
    pub fn deploy_type(&self) -> DeployType {
        match self {
            DeployStrategy::New(_) => DeployType::New,
            DeployStrategy::Fwd(_) => DeployType::Fwd,
            DeployStrategy::Lm(_) => DeployType::Lm,
            DeployStrategy::FwdLm(_) => DeployType::FwdLm,
        }
    }
}

/// Flat field set a deploy request is built from. Which fields matter is
/// decided by the [`DeployType`] passed to [`DeployRequest::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployParams {
    pub name: String,
    pub image: String,
    pub port: PortMap,
    pub env: BTreeMap<String, String>,
    pub src_addr: Option<String>,
    /// Defaults to `name`.
    pub src_name: Option<String>,
    /// Defaults to the external port.
    pub src_port: Option<u16>,
    pub dst_addr: Option<String>,
    pub bw_limit: Option<u32>,
    pub iteration: Option<u32>,
    pub data_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    name: String,
    strategy: DeployStrategy,
}

impl DeployRequest {
    pub fn build(deploy_type: DeployType, params: DeployParams) -> Result<Self, RequestError> {
        if params.name.is_empty() {
            return Err(RequestError::EmptyName);
        }
        let src_addr = match params.src_addr.filter(|addr| !addr.is_empty()) {
            Some(addr) => addr,
            None if deploy_type.requires_source() => {
                return Err(RequestError::MissingSourceAddress { deploy_type })
            }
            None => String::new(),
        };
        if deploy_type != DeployType::Fwd && params.image.is_empty() {
            return Err(RequestError::MissingImage { deploy_type });
        }
        let env = (!params.env.is_empty()).then(|| params.env.clone());
        let src_name = params.src_name.unwrap_or_else(|| params.name.clone());

        let strategy = match deploy_type {
            DeployType::New => DeployStrategy::New(NewApp {
                image: params.image,
                port: params.port,
                env: params.env,
            }),
            DeployType::Fwd => DeployStrategy::Fwd(Forward {
                src_addr,
                port: params.port,
            }),
            DeployType::Lm => DeployStrategy::Lm(LiveMigration {
                image: params.image,
                src_addr,
                src_name,
                port: params.port,
                dst_addr: params.dst_addr,
                env,
                bw_limit: params.bw_limit,
                iteration: params.iteration,
            }),
            DeployType::FwdLm => DeployStrategy::FwdLm(ForwardLiveMigration {
                image: params.image,
                src_addr,
                src_name,
                src_port: params.src_port.unwrap_or(params.port.external),
                port: params.port,
                dst_addr: params.dst_addr,
                env,
                bw_limit: params.bw_limit,
                iteration: params.iteration,
                data_rate: params.data_rate,
            }),
        };
        Ok(Self {
            name: params.name,
            strategy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> &DeployStrategy {
        &self.strategy
    }

    pub fn deploy_type(&self) -> DeployType {
        self.strategy.deploy_type()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveRequest {
    pub name: String,
}

impl RemoveRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Top-level message of the controller's line-oriented JSON channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Deploy(DeployRequest),
    Remove(RemoveRequest),
}

impl ControlRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ControlRequest::Deploy(_) => "deploy",
            ControlRequest::Remove(_) => "remove",
        }
    }
}

impl From<DeployRequest> for ControlRequest {
    fn from(request: DeployRequest) -> Self {
        ControlRequest::Deploy(request)
    }
}

impl From<RemoveRequest> for ControlRequest {
    fn from(request: RemoveRequest) -> Self {
        ControlRequest::Remove(request)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    method: &'static str,
    deploy: Option<DeployBody<'a>>,
    remove: Option<&'a RemoveRequest>,
}

// Every variant key is present, the unused ones as null.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    deploy_type: DeployType,
    new_app: Option<&'a NewApp>,
    fwd: Option<&'a Forward>,
    lm: Option<&'a LiveMigration>,
    fwdlm: Option<&'a ForwardLiveMigration>,
}

impl<'a> From<&'a DeployRequest> for DeployBody<'a> {
    fn from(request: &'a DeployRequest) -> Self {
        let mut body = DeployBody {
            name: &request.name,
            deploy_type: request.deploy_type(),
            new_app: None,
            fwd: None,
            lm: None,
            fwdlm: None,
        };
        match &request.strategy {
            DeployStrategy::New(new_app) => body.new_app = Some(new_app),
            DeployStrategy::Fwd(fwd) => body.fwd = Some(fwd),
            DeployStrategy::Lm(lm) => body.lm = Some(lm),
            DeployStrategy::FwdLm(fwdlm) => body.fwdlm = Some(fwdlm),
        }
        body
    }
}

impl Serialize for ControlRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            ControlRequest::Deploy(deploy) => Envelope {
                method: self.method(),
                deploy: Some(deploy.into()),
                remove: None,
            },
            ControlRequest::Remove(remove) => Envelope {
                method: self.method(),
                deploy: None,
                remove: Some(remove),
            },
        };
        envelope.serialize(serializer)
    }
}
