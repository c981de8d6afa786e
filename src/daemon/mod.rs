//! Resident transcription daemon: framed Unix-socket protocol, server core
//! and client helper.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::DaemonClient;
pub use server::DaemonServer;
