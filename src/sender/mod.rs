//! HTTP delivery to the remote collector.

pub mod client;

pub use client::{ClientConfig, ClientError, CollectorClient, SendError};
