//! Defines shared data structures for the Bluetooth module.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// A remote device as seen by the radio.
///
/// The address is the identity: two values with the same address are the
/// same device whatever their names say.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIdentity {
    address: String,
    name: Option<String>,
}

impl DeviceIdentity {
    /// Creates a new identity. Full MAC addresses are normalized to upper case.
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        let address = address.into();
        let address = extract_mac_address(&address).unwrap_or(address);
        Self { address, name }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for user-facing messages, falling back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Pulls the last `XX:XX:XX:XX:XX:XX` out of a platform id string.
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    static MAC_RE: OnceLock<Regex> = OnceLock::new();
    let re = MAC_RE.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("MAC address pattern is valid")
    });
    re.find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

/// Link state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A device offered to the caller, with bonded membership derived per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub device: DeviceIdentity,
    pub bonded: bool,
}

/// Bonded devices plus the devices discovered during the current scan.
#[derive(Debug, Default, Clone)]
pub struct CandidateSet {
    bonded: HashSet<DeviceIdentity>,
    discovered: Vec<DeviceIdentity>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_bonded(&mut self, bonded: impl IntoIterator<Item = DeviceIdentity>) {
        self.bonded = bonded.into_iter().collect();
    }

    /// Records a device seen during the scan. Returns false if it was already seen.
    pub fn insert_discovered(&mut self, device: DeviceIdentity) -> bool {
        if self.discovered.contains(&device) {
            return false;
        }
        self.discovered.push(device);
        true
    }

    pub fn clear_discovered(&mut self) {
        self.discovered.clear();
    }

    pub fn discovered(&self) -> &[DeviceIdentity] {
        &self.discovered
    }

    pub fn is_bonded(&self, device: &DeviceIdentity) -> bool {
        self.bonded.contains(device)
    }

    /// Union of both sets: bonded devices first (sorted by address), then
    /// discovered-only devices in discovery order.
    pub fn union(&self) -> Vec<Candidate> {
        let mut bonded: Vec<&DeviceIdentity> = self.bonded.iter().collect();
        bonded.sort_by(|a, b| a.address().cmp(b.address()));

        let mut out: Vec<Candidate> = bonded
            .into_iter()
            .map(|device| Candidate {
                device: device.clone(),
                bonded: true,
            })
            .collect();
        out.extend(
            self.discovered
                .iter()
                .filter(|device| !self.is_bonded(device))
                .map(|device| Candidate {
                    device: device.clone(),
                    bonded: false,
                }),
        );
        out
    }
}

/// Bond state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    Bonded,
    Bonding,
    None,
    Unknown,
}

/// Radio technology of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Classic,
    LowEnergy,
    Dual,
    Unknown,
}

/// Platform details used for the device summary.
#[derive(Debug, Clone)]
pub struct DeviceDetails {
    pub bond_state: BondState,
    pub kind: DeviceKind,
}
