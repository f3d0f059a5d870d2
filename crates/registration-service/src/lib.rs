//! Registration Service - HTTP front end for identity registration.
//!
//! Wires the registration workflow to real collaborators:
//! - Verification codes delivered over Signal
//! - Face comparison by a remote biometric matcher
//! - Submitted registrations written to an encrypted archive

pub mod api;
pub mod archive;
pub mod config;
pub mod error;
pub mod matcher;
pub mod sessions;
pub mod signal;

pub use archive::EncryptedArchive;
pub use config::Config;
pub use error::ServiceError;
pub use matcher::HttpMatcher;
pub use sessions::SessionRegistry;
pub use signal::SignalGateway;
