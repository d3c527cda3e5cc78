//! Core functionality for the robot car link
//! This module contains the device-connection and command-transport layer.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{LinkManager, LinkSession};
