//! SecureShare: encrypted, short-lived file sharing behind 6-digit codes.
//!
//! A sender uploads files and receives a share code plus a QR code; a
//! receiver redeems the code to list and download the files. Payloads are
//! sealed with AES-256-GCM under a key derived from the code, and shares are
//! purged once they expire or run out of downloads.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod sweeper;
pub mod utils;
