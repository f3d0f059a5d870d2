//! Archive backends for submitted registrations.

mod encrypted;

pub use encrypted::EncryptedArchive;
pub use registration_core::MemoryArchive;
