use serde::{Deserialize, Serialize};

/// Structured acknowledgement some controller methods answer with. Plain
/// deploy/remove acknowledgements may also be free text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerResponse {
    pub ok: bool,
    #[serde(default)]
    pub msg: String,
}
