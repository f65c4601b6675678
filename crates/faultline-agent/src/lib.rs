mod analyzer;
mod console;
mod errors;
pub mod prompts;
mod repair;
mod scheduler;

pub use analyzer::{AnalysisOutcome, AnalysisPhase, CausalAnalyzer, StepsSource};
pub use console::{Console, EchoMode};
pub use errors::TaskError;
pub use repair::{
    CODE_EXTENSIONS, RepairGenerator, RepairOutcome, RepairPath, is_code_task, load_code_examples,
};
pub use scheduler::{AnalysisJob, RepairJob, RunSummary, Scheduler};

use faultline_core::{AppConfig, ModelConfig, ModelRole};
use faultline_llm::{CompletionClient, CompletionError, CompletionRequest};
use std::sync::Arc;

/// A client bound to one model configuration.
#[derive(Clone)]
pub struct ModelHandle {
    pub client: Arc<dyn CompletionClient>,
    pub model: ModelConfig,
}

impl ModelHandle {
    pub fn new(client: Arc<dyn CompletionClient>, model: ModelConfig) -> Self {
        Self { client, model }
    }

    pub fn request(&self, prompt: String, stream: bool) -> CompletionRequest {
        CompletionRequest {
            prompt,
            model: self.model.model.clone(),
            max_tokens: self.model.max_tokens,
            stream,
        }
    }

    /// Stream a completion, forwarding each fragment to `on_fragment`.
    pub fn stream_text(
        &self,
        prompt: String,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<String, CompletionError> {
        self.client
            .complete_stream(&self.request(prompt, true))?
            .drain(on_fragment)
    }

    pub fn text(&self, prompt: String) -> Result<String, CompletionError> {
        self.client.complete_text(&self.request(prompt, false))
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// One handle per role, all sharing a client.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub causal: ModelHandle,
    pub pseudo_steps: ModelHandle,
    pub repair_planner: ModelHandle,
    pub verifier: ModelHandle,
}

impl ModelSet {
    pub fn from_config(client: Arc<dyn CompletionClient>, cfg: &AppConfig) -> Self {
        let handle = |role| ModelHandle::new(Arc::clone(&client), cfg.model(role).clone());
        Self {
            causal: handle(ModelRole::Causal),
            pseudo_steps: handle(ModelRole::PseudoSteps),
            repair_planner: handle(ModelRole::RepairPlanner),
            verifier: handle(ModelRole::Verifier),
        }
    }

    pub fn analyzer(&self) -> CausalAnalyzer {
        CausalAnalyzer::new(self.causal.clone(), self.pseudo_steps.clone())
    }
}
