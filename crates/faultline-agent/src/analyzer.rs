use crate::ModelHandle;
use crate::errors::TaskError;
use crate::prompts;
use faultline_core::TaskRecord;
use faultline_llm::CompletionError;

/// Which request a streamed fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPhase {
    PseudoSteps,
    Causal,
}

impl AnalysisPhase {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisPhase::PseudoSteps => "Pseudo Steps",
            AnalysisPhase::Causal => "Causal Analysis",
        }
    }
}

/// Where the steps fed to the causal prompt came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepsSource {
    Provided,
    Generated { chars: usize },
    /// Generation failed; the raw question stands in for the steps.
    QuestionFallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub task_id: String,
    pub causal_analysis: String,
    pub steps: StepsSource,
}

impl AnalysisOutcome {
    pub fn used_pseudo_steps(&self) -> bool {
        !matches!(self.steps, StepsSource::Provided)
    }
}

/// Produces the causal-chain narrative for one task.
#[derive(Debug, Clone)]
pub struct CausalAnalyzer {
    causal: ModelHandle,
    pseudo_steps: ModelHandle,
}

impl CausalAnalyzer {
    pub fn new(causal: ModelHandle, pseudo_steps: ModelHandle) -> Self {
        Self {
            causal,
            pseudo_steps,
        }
    }

    /// Steps for `task`, generating them from the question when absent.
    /// Never fails: generation problems fall back to the question text.
    pub fn resolve_steps(
        &self,
        task: &TaskRecord,
        on_fragment: &mut dyn FnMut(AnalysisPhase, &str),
    ) -> (String, StepsSource) {
        if task.has_steps() {
            return (task.steps_text.clone(), StepsSource::Provided);
        }
        let generated = self.pseudo_steps.stream_text(
            prompts::pseudo_steps_prompt(&task.question),
            &mut |fragment: &str| on_fragment(AnalysisPhase::PseudoSteps, fragment),
        );
        match generated {
            Ok(steps) if !steps.trim().is_empty() => {
                let chars = steps.chars().count();
                (steps, StepsSource::Generated { chars })
            }
            Ok(_) => (
                task.question.clone(),
                StepsSource::QuestionFallback {
                    reason: "model returned no steps".to_string(),
                },
            ),
            Err(err) => (
                task.question.clone(),
                StepsSource::QuestionFallback {
                    reason: err.to_string(),
                },
            ),
        }
    }

    /// Under deterministic decoding an empty narrative would repeat, so it is
    /// reported as a non-retryable `Malformed` generation error.
    pub fn analyze(
        &self,
        task: &TaskRecord,
        aux_text: &str,
        on_fragment: &mut dyn FnMut(AnalysisPhase, &str),
    ) -> Result<AnalysisOutcome, TaskError> {
        let (steps, source) = self.resolve_steps(task, on_fragment);
        let prompt = prompts::causal_analysis_prompt(&steps, aux_text);
        let narrative = self.causal.stream_text(prompt, &mut |fragment: &str| {
            on_fragment(AnalysisPhase::Causal, fragment)
        })?;
        if narrative.trim().is_empty() {
            return Err(TaskError::Generation(CompletionError::Malformed(
                "model returned an empty analysis".to_string(),
            )));
        }
        Ok(AnalysisOutcome {
            task_id: task.task_id.clone(),
            causal_analysis: narrative,
            steps: source,
        })
    }
}
