//! Task-coordination primitives: the per-key semaphore pool, the
//! serialized edit chain, the leading+trailing debounced trigger, and the
//! single-flight set. All state lives in owned structs handed out at
//! construction; there are no module-level tables.

pub mod chain;
pub mod debounce;
pub mod flight;
pub mod keyed;

pub use chain::{ChainError, EditChain, Submitted};
pub use debounce::{DebouncedTrigger, MergeArgs};
pub use flight::{FlightGuard, SingleFlightSet};
pub use keyed::{KeyPermit, KeyedSemaphores};
