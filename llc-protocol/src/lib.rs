use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Service name reported by the liveness probe
pub const SERVICE_NAME: &str = "ll-connect-wireless";

/// Marker returned by the liveness probe
pub const RUNNING_MARKER: &str = "running";

// ============================================================================
// Hardware addresses
// ============================================================================

/// 6-byte hardware address of a wireless receiver or transmitter.
///
/// Displays and serializes in canonical lower-hex colon form
/// (`aa:bb:cc:dd:ee:ff`). Parsing also accepts upper case and `-` separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// True for the all-zero address, which the hub uses for "unbound"
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(format!("Invalid MAC address '{}': expected 6 octets", trimmed));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("Invalid MAC address '{}': bad octet '{}'", trimmed, part));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|e| format!("Invalid MAC address '{}': {}", trimmed, e))?;
        }
        Ok(MacAddr(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

// ============================================================================
// Hub state
// ============================================================================

/// One fan group behind one wireless receiver, as reported by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanRecord {
    pub mac: MacAddr,
    /// Paired transmitter address; all-zero when unbound
    pub master_mac: MacAddr,
    pub channel: u8,
    pub rx_type: u8,
    /// Number of fans in the group (1-9)
    pub fan_count: u8,
    /// Current duty cycle (0-255)
    pub pwm: u8,
    /// Tachometer readings, 0 = no fan on that sub-channel
    pub rpm: [u16; 4],
    /// Duty cycle to command next (0-255)
    pub target_pwm: u8,
    pub is_bound: bool,
}

impl FanRecord {
    /// Tachometer readings for sub-channels that actually have a fan
    pub fn active_rpm(&self) -> impl Iterator<Item = u16> + '_ {
        self.rpm.iter().copied().filter(|r| *r > 0)
    }
}

/// Snapshot published to clients after every successful control tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemStatus {
    /// Unix time in seconds
    pub timestamp: f64,
    pub cpu_temp: Option<f32>,
    pub gpu_temp: Option<f32>,
    pub fans: Vec<FanRecord>,
}

impl SystemStatus {
    /// Build a snapshot stamped with the current wall-clock time
    pub fn now(cpu_temp: Option<f32>, gpu_temp: Option<f32>, fans: Vec<FanRecord>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            timestamp,
            cpu_temp,
            gpu_temp,
            fans,
        }
    }
}

// ============================================================================
// Envelopes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    /// Liveness probe
    Ping,
    /// Latest published `SystemStatus`
    Status,
    /// Reload settings from the settings store
    ReloadSettings,
}

impl Request {
    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Status => "Status",
            Request::ReloadSettings => "ReloadSettings",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemStatus>,
}

impl ResponseData {
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn status(s: SystemStatus) -> Self { Self { system: Some(s), ..Self::default() } }
}

impl Response {
    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_status(status: SystemStatus) -> Self {
        Response::Ok(ResponseData::status(status))
    }

    pub fn running() -> Self {
        Response::Ok(ResponseData {
            value: Some(RUNNING_MARKER.to_string()),
            service: Some(SERVICE_NAME.to_string()),
            system: None,
        })
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}
