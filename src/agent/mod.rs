//! Agent core: intent taxonomy, classification, slot filling and the
//! request orchestrator.

pub mod classifier;
pub mod intent;
pub mod orchestrator;
pub mod slots;
pub mod thread;

pub use orchestrator::{InteractRequest, InteractResponse, InteractStatus, Orchestrator};
