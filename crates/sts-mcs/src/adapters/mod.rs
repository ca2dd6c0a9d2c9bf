//! Collaborator adapters: concrete implementations of small traits the
//! rest of the crate depends on instead of reaching for global state
//! (`spec.md` §6 "Design Notes").

pub mod clock;
pub mod rng;
