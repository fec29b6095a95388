//! Singleton-document handling: the pure line patcher (ADD/DEL blocks
//! with normalization and dedup) and the manager that serializes patch
//! application through per-document edit chains.

pub mod manager;
pub mod normalize;
pub mod patch;

pub use manager::{DocEvent, DocumentManager};
pub use patch::{apply_patch, parse_patch, PatchError, PatchOp, PatchTarget};
