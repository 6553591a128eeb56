use std::time::Duration;

use cloudlet_client::{header::HeaderError, request::RequestError};
use thiserror::Error;
use utils::{net::TransportError, serde::json_line::JsonLineError};

use crate::{probe::ProbeError, session::SessionError};

#[derive(Debug, Error)]
pub enum CloudletClientError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error("Invalid session header: {0}")]
    InvalidHeader(#[from] HeaderError),
    #[error("Failed to encode control request: {0}")]
    EncodingFail(#[from] JsonLineError),
    #[error("Failed to communicate with the controller: {0}")]
    CommunicationFail(#[from] TransportError),
    #[error("Session failed: {0}")]
    SessionFail(#[from] SessionError),
    #[error("Probe failed: {0}")]
    ProbeFail(#[from] ProbeError),
    #[error("Application at {address} is not ready after {waited:?}")]
    ApplicationNotReady { address: String, waited: Duration },
}
