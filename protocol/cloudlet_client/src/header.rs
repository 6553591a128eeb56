//! Binary session header written by the client before any payload traffic.
//!
//! The header carries no length prefix, so both ends must agree on the
//! [`ProtocolVersion`] out of band:
//!
//! * `v1` (16 bytes): `[session_id:16]`
//! * `v2` (21 bytes): `[session_id:16][forward_ipv4:4][flags:1]`

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const SESSION_ID_SIZE: usize = 16;
pub const FLAG_RESUME: u8 = 0x1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Unexpected header size for protocol {version}: {actual}B (expected {expected}B)")]
    InvalidLength {
        version: ProtocolVersion,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid session id length: {0}B")]
    InvalidSessionId(usize),
    #[error("Can't resolve {host} to an IPv4 address")]
    AddressResolution { host: String },
    #[error("Unknown protocol version: {0}")]
    UnknownVersion(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    #[default]
    V1,
    V2,
}

impl ProtocolVersion {
    pub const fn header_size(&self) -> usize {
        match self {
            ProtocolVersion::V1 => SESSION_ID_SIZE,
            ProtocolVersion::V2 => SESSION_ID_SIZE + 4 + 1,
        }
    }

    pub fn codec(&self) -> &'static dyn HeaderCodec {
        match self {
            ProtocolVersion::V1 => &V1Codec,
            ProtocolVersion::V2 => &V2Codec,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "v1"),
            ProtocolVersion::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(ProtocolVersion::V1),
            "v2" | "2" => Ok(ProtocolVersion::V2),
            other => Err(HeaderError::UnknownVersion(other.to_owned())),
        }
    }
}

/// Where the application should forward or replay traffic after a migration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardTarget {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl ForwardTarget {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Accepts a dotted quad or a host name. Host names are resolved with the
    /// system resolver and the first IPv4 address wins.
    pub fn resolve(host: &str, port: u16) -> Result<Self, HeaderError> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Self::new(ip, port));
        }
        let resolution_error = || HeaderError::AddressResolution {
            host: host.to_owned(),
        };
        (host, port)
            .to_socket_addrs()
            .map_err(|_| resolution_error())?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(Self::new(*v4.ip(), port)),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(resolution_error)
    }
}

impl FromStr for ForwardTarget {
    type Err = HeaderError;

    /// `host` or `host:port`, port defaults to 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| HeaderError::AddressResolution {
                    host: s.to_owned(),
                })?;
                Self::resolve(host, port)
            }
            None => Self::resolve(s, 0),
        }
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionHeader {
    pub session_id: Uuid,
    pub forward: Option<ForwardTarget>,
    pub resume: bool,
}

impl SessionHeader {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            forward: None,
            resume: false,
        }
    }

    pub fn with_forward(mut self, forward: Option<ForwardTarget>) -> Self {
        self.forward = forward;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn flags(&self) -> u8 {
        if self.resume {
            FLAG_RESUME
        } else {
            0
        }
    }

    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>, HeaderError> {
        version.codec().encode(self)
    }

    pub fn decode(version: ProtocolVersion, bytes: &[u8]) -> Result<Self, HeaderError> {
        version.codec().decode(bytes)
    }
}

impl fmt::Display for SessionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (ip, port) = self
            .forward
            .map(|target| (target.ip, target.port))
            .unwrap_or((Ipv4Addr::UNSPECIFIED, 0));
        write!(
            f,
            "sessionId={}, hostIP={}, port={}, flag=0x{:02x}",
            self.session_id,
            ip,
            port,
            self.flags()
        )
    }
}

/// One implementation per header layout. Fields a layout has no room for are
/// left out of the encoding.
pub trait HeaderCodec: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    fn write_fields(&self, header: &SessionHeader, bytes: &mut Vec<u8>);

    fn read_fields(&self, bytes: &[u8]) -> Result<SessionHeader, HeaderError>;

    fn encode(&self, header: &SessionHeader) -> Result<Vec<u8>, HeaderError> {
        let mut bytes = Vec::with_capacity(self.version().header_size());
        self.write_fields(header, &mut bytes);
        check_length(self.version(), bytes.len())?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<SessionHeader, HeaderError> {
        check_length(self.version(), bytes.len())?;
        self.read_fields(bytes)
    }
}

pub struct V1Codec;

impl HeaderCodec for V1Codec {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    fn write_fields(&self, header: &SessionHeader, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&session_id_to_bytes(&header.session_id));
    }

    fn read_fields(&self, bytes: &[u8]) -> Result<SessionHeader, HeaderError> {
        check_length(self.version(), bytes.len())?;
        Ok(SessionHeader::new(session_id_from_bytes(bytes)?))
    }
}

pub struct V2Codec;

impl HeaderCodec for V2Codec {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn write_fields(&self, header: &SessionHeader, bytes: &mut Vec<u8>) {
        let ip = header
            .forward
            .map(|target| target.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        bytes.extend_from_slice(&session_id_to_bytes(&header.session_id));
        bytes.extend_from_slice(&ip.octets());
        bytes.push(header.flags());
    }

    fn read_fields(&self, bytes: &[u8]) -> Result<SessionHeader, HeaderError> {
        check_length(self.version(), bytes.len())?;
        let [session_id @ .., a, b, c, d, flags] = bytes else {
            return Err(HeaderError::InvalidSessionId(bytes.len()));
        };
        let session_id = session_id_from_bytes(session_id)?;
        let ip = Ipv4Addr::new(*a, *b, *c, *d);
        // Reserved flag bits are ignored.
        let resume = flags & FLAG_RESUME != 0;
        let forward = (!ip.is_unspecified()).then(|| ForwardTarget::new(ip, 0));
        Ok(SessionHeader {
            session_id,
            forward,
            resume,
        })
    }
}

pub fn session_id_to_bytes(session_id: &Uuid) -> [u8; SESSION_ID_SIZE] {
    let (high, low) = session_id.as_u64_pair();
    let mut bytes = [0u8; SESSION_ID_SIZE];
    bytes[..8].copy_from_slice(&high.to_be_bytes());
    bytes[8..].copy_from_slice(&low.to_be_bytes());
    bytes
}

pub fn session_id_from_bytes(bytes: &[u8]) -> Result<Uuid, HeaderError> {
    let bytes: [u8; SESSION_ID_SIZE] = bytes
        .get(..SESSION_ID_SIZE)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or(HeaderError::InvalidSessionId(bytes.len()))?;
    let (high, low) = bytes.split_at(8);
    let high = u64::from_be_bytes(high.try_into().map_err(|_| HeaderError::InvalidSessionId(8))?);
    let low = u64::from_be_bytes(low.try_into().map_err(|_| HeaderError::InvalidSessionId(8))?);
    Ok(Uuid::from_u64_pair(high, low))
}

fn check_length(version: ProtocolVersion, actual: usize) -> Result<(), HeaderError> {
    let expected = version.header_size();
    if actual != expected {
        return Err(HeaderError::InvalidLength {
            version,
            expected,
            actual,
        });
    }
    Ok(())
}
