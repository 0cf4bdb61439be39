//! Khipu payment provider: REST client, notification signatures and the
//! notification endpoint.

pub mod client;
pub mod signature;
pub mod webhook;

pub use client::KhipuClient;
