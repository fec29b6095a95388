//! Shared types, configuration, error taxonomy, and collaborator traits
//! for the mailmind core. Every other crate in the workspace depends on
//! this one; it depends on nothing but serde/chrono plumbing.

pub mod config;
pub mod error;
pub mod hash;
pub mod keys;
pub mod mail;
pub mod types;

pub use error::{MailmindError, Result};
pub use types::{Artifact, ArtifactKind, Classification, Fingerprint};
