//! Constants for the LL-Connect-Wireless core
//!
//! Centralizes the hub wire format, USB identifiers, and control loop timing.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// Application identity and on-disk locations
pub mod paths {
    use std::path::PathBuf;

    /// Application name, used for the config directory and socket file
    pub const APP_NAME: &str = "ll-connect-wireless";

    /// Settings file name inside the config directory
    pub const SETTINGS_FILE: &str = "config.json";

    /// Socket file name inside the runtime directory
    pub const SOCKET_FILE: &str = "ll-connect-wireless.sock";

    /// Default settings file path: `$XDG_CONFIG_HOME/ll-connect-wireless/config.json`
    pub fn default_settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(SETTINGS_FILE))
    }

    /// Default socket path for a given user: `/run/user/<uid>/ll-connect-wireless.sock`
    pub fn default_socket_path(uid: u32) -> PathBuf {
        PathBuf::from(format!("/run/user/{}", uid)).join(SOCKET_FILE)
    }
}

/// USB identifiers and transfer parameters
pub mod usb {
    use super::Duration;

    /// Vendor ID shared by both hub endpoints
    pub const VENDOR_ID: u16 = 0x0416;

    /// Product ID of the outbound command device
    pub const TX_PRODUCT_ID: u16 = 0x8040;

    /// Product ID of the inbound query device
    pub const RX_PRODUCT_ID: u16 = 0x8041;

    /// Interface claimed on both devices
    pub const INTERFACE: u8 = 0;

    /// Bulk OUT endpoint
    pub const ENDPOINT_OUT: u8 = 0x01;

    /// Bulk IN endpoint
    pub const ENDPOINT_IN: u8 = 0x81;

    /// Size of every outbound command frame
    pub const FRAME_LEN: usize = 64;

    /// Maximum size of one inbound chunk; a shorter chunk ends the transfer
    pub const CHUNK_LEN: usize = 512;

    /// Per-chunk read timeout
    pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

    /// Per-frame write timeout
    pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
}

/// Hub frame format
pub mod codec {
    /// Opcode for both the device query and per-fan command frames
    pub const OPCODE: u8 = 0x10;

    /// Fixed protocol bytes following channel and rx type in command frames
    pub const COMMAND_TAIL: [u8; 2] = [0x12, 0x10];

    /// Bytes per response page
    pub const PAGE_STRIDE: usize = 434;

    /// Offset of the first record in a page
    pub const RECORD_OFFSET: usize = 4;

    /// Bytes per device record
    pub const RECORD_LEN: usize = 42;

    /// Value of a record's trailing byte when the record is valid
    pub const RECORD_SENTINEL: u8 = 28;

    /// Pages requested per control tick
    pub const PAGES_PER_QUERY: u8 = 1;
}

/// Control loop timing and failure policy
pub mod control {
    use super::Duration;

    /// Pause after every control tick
    pub const LOOP_INTERVAL: Duration = Duration::from_millis(200);

    /// Pause between fans during the frame fan-out
    pub const INTER_FAN_DELAY: Duration = Duration::from_millis(100);

    /// Extra pause when no temperature sample is available
    pub const NO_TEMPERATURE_BACKOFF: Duration = Duration::from_secs(1);

    /// Consecutive failures tolerated; one more ends the loop
    pub const FATAL_THRESHOLD: u32 = 4;
}

/// Temperature sources
pub mod temperature {
    use super::Duration;

    /// Base path for hwmon devices
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// AMD package temperature label, preferred over other sensors
    pub const CPU_PREFERRED_LABEL: &str = "Tctl";

    /// Millidegrees per degree in hwmon `tempN_input` files
    pub const MILLIDEGREES: f32 = 1000.0;

    /// Maximum time to wait on `nvidia-smi`
    pub const GPU_QUERY_TIMEOUT: Duration = Duration::from_secs(1);
}

/// Settings bounds
pub mod limits {
    /// Lowest temperature accepted in a control law (°C)
    pub const MIN_TEMP_C: u8 = 20;

    /// Highest temperature accepted in a control law (°C)
    pub const MAX_TEMP_C: u8 = 100;

    /// Highest duty cycle percentage
    pub const MAX_PERCENT: u8 = 100;

    /// Highest wire duty cycle
    pub const MAX_PWM: u8 = 255;

    /// Points in a curve
    pub const CURVE_POINTS: usize = 4;

    /// Temperature pair used when a linear law is given as a single flat percentage
    pub const FLAT_LINEAR_TEMPS: (u8, u8) = (60, 61);
}
