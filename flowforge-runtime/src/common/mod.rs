//! Small shared utilities reused across the runtime's adapters.

pub mod duration_serde;
