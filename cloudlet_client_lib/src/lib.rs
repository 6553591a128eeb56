use cloudlet_client::request::{DeployRequest, RemoveRequest};
use log::info;

pub mod cloudlet_client_error;
pub mod console;
pub mod experiment;
pub mod probe;
pub mod request_handlers;
pub mod session;

pub use cloudlet_client_error::CloudletClientError;
pub use console::Console;
pub use request_handlers::ControllerAck;

pub const DEFAULT_CONTROLLER_PORT: u16 = 9999;

/// Address of the cloudlet controller. Every call opens its own short-lived
/// connection, so the handle is cheap to clone and holds no socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudletController {
    host: String,
    port: u16,
}

impl CloudletController {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn deploy(&self, request: DeployRequest) -> Result<ControllerAck, CloudletClientError> {
        info!(
            "Deploy {} ({}) via {}:{}",
            request.name(),
            request.deploy_type(),
            self.host,
            self.port
        );
        request_handlers::deploy(&self.host, self.port, request).await
    }

    pub async fn remove(&self, request: RemoveRequest) -> Result<ControllerAck, CloudletClientError> {
        info!("Remove {} via {}:{}", request.name, self.host, self.port);
        request_handlers::remove(&self.host, self.port, request).await
    }
}
