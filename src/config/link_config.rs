use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    CONNECT_ATTEMPT_TIMEOUT_MS, DEFAULT_SCAN_DURATION_SECS, DISCOVERY_SETTLE_DELAY_MS,
    LIVENESS_PROBE_TOKEN, MAX_SEND_RETRIES, SEND_RETRY_DELAY_MS,
};

/// Tunables for discovery, negotiation and the send path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Pause after cancelling discovery before the first connection attempt.
    pub settle_delay_ms: u64,

    /// Upper bound for one connection strategy.
    pub connect_timeout_ms: u64,

    /// Optional bound for the whole strategy sequence.
    pub negotiation_deadline_ms: Option<u64>,

    /// Write attempts after the first failure of a command.
    pub send_max_retries: u32,

    /// Delay between write attempts.
    pub send_retry_delay_ms: u64,

    /// Token written right after connecting. `None` skips the probe.
    pub probe_token: Option<String>,

    /// How long a live inquiry runs before it is stopped.
    pub scan_duration_secs: u64,

    /// Adapter to use (e.g. `hci0`). `None` picks the default adapter.
    pub adapter_name: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            settle_delay_ms: DISCOVERY_SETTLE_DELAY_MS,
            connect_timeout_ms: CONNECT_ATTEMPT_TIMEOUT_MS,
            negotiation_deadline_ms: None,
            send_max_retries: MAX_SEND_RETRIES,
            send_retry_delay_ms: SEND_RETRY_DELAY_MS,
            probe_token: Some(LIVENESS_PROBE_TOKEN.to_string()),
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
            adapter_name: None,
        }
    }
}
