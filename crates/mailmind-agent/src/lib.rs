//! The assembled agent: every service constructed with explicit handles
//! at init, background tasks (processor queue, maintenance purge), and
//! the public collaborator API the mail client embeds.

pub mod agent;
pub mod maintenance;

pub use agent::{Collaborators, MailAgent};
