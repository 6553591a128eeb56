pub mod net;
pub mod serde;
