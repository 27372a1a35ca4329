pub mod orchestrator;
pub mod pricing;
pub mod registry;
pub mod suggestions;

pub use orchestrator::{AiOrchestrator, CompletionParams, ModelAnswer};
pub use registry::{find_model, ModelSpec, ProviderKind};
