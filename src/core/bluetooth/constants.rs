//! Constants used throughout the link layer
//! This module contains the constant values used by the transport,
//! such as the serial-port UUID, channel order, delays and retry budgets.

use uuid::Uuid;

/// Serial Port Profile service class UUID (SPP over RFCOMM)
pub const UUID_SERIAL_PORT_PROFILE: Uuid =
    Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// Raw RFCOMM channels tried after the service-record strategies, in order.
/// Channel 1 is the default for modules without SDP; the rest cover
/// firmware that exposes the serial endpoint elsewhere.
pub const RAW_RFCOMM_CHANNELS: [u8; 5] = [1, 2, 3, 4, 5];

/// Delay after cancelling discovery before the first connection attempt
pub const DISCOVERY_SETTLE_DELAY_MS: u64 = 500;

/// Timeout for a single connection strategy in milliseconds
pub const CONNECT_ATTEMPT_TIMEOUT_MS: u64 = 10_000;

/// Retries after the first failed write of a command
pub const MAX_SEND_RETRIES: u32 = 2;

/// Delay between write attempts in milliseconds
pub const SEND_RETRY_DELAY_MS: u64 = 100;

/// Sentinel written right after connecting to check the link
pub const LIVENESS_PROBE_TOKEN: &str = "TEST";

/// Live inquiry duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 12;
