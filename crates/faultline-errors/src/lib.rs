//! User-facing error rendering for the `faultline` binary.
//!
//! Errors from the pipeline arrive as `anyhow::Error` chains. The handler
//! classifies them by message and attaches concrete recovery steps.

use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
    pub error_type: ErrorType,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Bad or unreadable settings files.
    Configuration,
    /// Model server unreachable or timing out.
    Endpoint,
    /// The server answered but rejected the model or request.
    Model,
    /// Metadata, analysis log or auxiliary files missing or malformed.
    Input,
    /// Result log or submission could not be written.
    Storage,
    Unknown,
}

impl ErrorType {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorType::Configuration => "config",
            ErrorType::Endpoint => "endpoint",
            ErrorType::Model => "model",
            ErrorType::Input => "input",
            ErrorType::Storage => "storage",
            ErrorType::Unknown => "error",
        }
    }
}

impl EnhancedError {
    pub fn new(title: impl Into<String>, message: impl Into<String>, error_type: ErrorType) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            suggestions: Vec::new(),
            error_type,
            context: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions
            .extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn into_error(self) -> Error {
        Error::new(self)
    }

    pub fn format(&self, verbose: bool) -> String {
        let mut output = format!("[{}] {}\n  {}\n", self.error_type.label(), self.title, self.message);
        if verbose && let Some(context) = &self.context {
            output.push_str(&format!("\n  Context: {context}\n"));
        }
        if !self.suggestions.is_empty() {
            output.push_str("\n  Suggestions:\n");
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("    {}. {}\n", i + 1, suggestion));
            }
        }
        output
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

impl std::error::Error for EnhancedError {}

#[derive(Debug, Default)]
pub struct ErrorHandler {
    verbose: bool,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn enhance(&self, error: &Error) -> EnhancedError {
        if let Some(enhanced) = error.downcast_ref::<EnhancedError>() {
            return enhanced.clone();
        }
        let chain = format!("{error:#}");
        classify(&chain).with_context(format!("{error:?}"))
    }

    pub fn handle(&self, error: &Error) -> String {
        self.enhance(error).format(self.verbose)
    }

    pub fn to_json(&self, error: &Error) -> serde_json::Value {
        let enhanced = self.enhance(error);
        serde_json::json!({
            "error": enhanced.message,
            "type": enhanced.error_type,
            "suggestions": enhanced.suggestions,
        })
    }
}

fn classify(message: &str) -> EnhancedError {
    let lower = message.to_lowercase();

    if lower.contains("could not reach model endpoint") || lower.contains("connection refused") {
        return errors::endpoint_unreachable(message);
    }
    if lower.contains("timed out") {
        return EnhancedError::new("Model Request Timed Out", message, ErrorType::Endpoint)
            .with_suggestions([
                "Raise `endpoint.timeout_seconds` in .faultline/settings.json",
                "Lower `scheduler.workers` so the server is not oversubscribed",
                "Use a smaller model for the slow role",
            ]);
    }
    if lower.contains("http 404") || lower.contains("model not found") || lower.contains("not found, try pulling") {
        return EnhancedError::new("Model Not Available", message, ErrorType::Model)
            .with_suggestions([
                "Pull the model first, e.g. `ollama pull llama3.1:8b`",
                "Check the `models` section of .faultline/settings.json",
            ]);
    }
    if lower.contains("settings") || lower.contains("config") || lower.contains("toml") {
        return EnhancedError::new("Configuration Error", message, ErrorType::Configuration)
            .with_suggestions([
                "Run `faultline config show` to see the effective configuration",
                "Check .faultline/config.toml and .faultline/settings*.json for syntax errors",
            ]);
    }
    if lower.contains("result log") || lower.contains("submission") {
        return EnhancedError::new("Cannot Write Output", message, ErrorType::Storage)
            .with_suggestions([
                "Check that the output directory exists and is writable",
                "Check free disk space",
            ]);
    }
    if lower.contains("no such file") || lower.contains("metadata") || lower.contains("analysis log") {
        return EnhancedError::new("Input Problem", message, ErrorType::Input).with_suggestions([
            "Check the --metadata / --analysis paths",
            "Metadata must be JSON lines (.jsonl) or a JSON array (.json) with a task_id per record",
        ]);
    }

    EnhancedError::new("Error", message, ErrorType::Unknown)
        .with_suggestion("Re-run with -v for more detail")
}

/// Constructors for errors the CLI raises directly.
pub mod errors {
    use super::*;

    pub fn endpoint_unreachable(detail: &str) -> EnhancedError {
        EnhancedError::new("Model Server Unreachable", detail, ErrorType::Endpoint).with_suggestions([
            "Start the model server with `ollama serve`",
            "Check `endpoint.base_url` or set FAULTLINE_ENDPOINT",
        ])
    }

    pub fn file_not_found(path: &str) -> EnhancedError {
        EnhancedError::new(
            "File Not Found",
            format!("The file '{path}' does not exist."),
            ErrorType::Input,
        )
        .with_suggestion("Check the path; relative paths resolve against --workspace")
    }

    pub fn missing_metadata() -> EnhancedError {
        EnhancedError::new(
            "No Metadata Source",
            "No task metadata was given.",
            ErrorType::Input,
        )
        .with_suggestions([
            "Pass --metadata <path>",
            "Or set `paths.metadata` in .faultline/settings.json",
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn unreachable_endpoint_suggests_ollama_serve() {
        let handler = ErrorHandler::new();
        let error = anyhow!("could not reach model endpoint http://localhost:11434/v1/chat/completions: connection refused");
        let output = handler.handle(&error);
        assert!(output.contains("Model Server Unreachable"));
        assert!(output.contains("ollama serve"));
    }

    #[test]
    fn classification_sees_the_whole_chain() {
        let error = Err::<(), _>(anyhow!("Permission denied (os error 13)"))
            .context("failed to open result log causal_outputs.jsonl")
            .expect_err("error");
        let enhanced = ErrorHandler::new().enhance(&error);
        assert_eq!(enhanced.error_type, ErrorType::Storage);
    }

    #[test]
    fn enhanced_errors_pass_through() {
        let error = errors::missing_metadata().into_error();
        let output = ErrorHandler::new().handle(&error);
        assert!(output.contains("No Metadata Source"));
        assert!(output.contains("--metadata"));
    }

    #[test]
    fn json_rendering_carries_type_and_suggestions() {
        let value = ErrorHandler::new().to_json(&anyhow!("request timed out after 300s"));
        assert_eq!(value["type"], "endpoint");
        assert!(!value["suggestions"].as_array().expect("array").is_empty());
    }

    #[test]
    fn verbose_format_includes_context() {
        let err = EnhancedError::new("Input Problem", "bad record", ErrorType::Input)
            .with_context("line 3");
        assert!(err.format(true).contains("Context: line 3"));
        assert!(!err.format(false).contains("Context"));
    }
}
