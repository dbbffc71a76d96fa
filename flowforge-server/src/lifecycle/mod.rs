pub mod engine;
pub mod state_machine;

pub use engine::{InstallRequest, LifecycleEngine, UpdateRequest};
