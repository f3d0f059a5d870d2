//! Verification code delivery over Signal.

mod client;

pub use client::SignalGateway;
