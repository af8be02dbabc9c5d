mod orchestrator;
mod prompt;

pub use orchestrator::{CheckRequest, CheckingOptions, CheckingOrchestrator};
