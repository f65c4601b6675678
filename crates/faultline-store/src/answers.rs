use faultline_core::{ANALYSIS_FAILURE_PREFIX, REPAIR_FAILURE_PREFIX};
use regex::Regex;
use std::sync::OnceLock;

fn code_block_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[^\n]*\n([\s\S]*?)```").ok())
        .as_ref()
}

fn core_answer_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:the final answer is|final answer[:：]?|answer[:：]?)\s*([^.\n\r]+)").ok()
    })
    .as_ref()
}

/// Body of the first fenced block, or the whole text trimmed.
pub fn extract_code_block(text: &str) -> String {
    code_block_re()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| text.trim().to_string())
}

/// The span after "the final answer is" / "final answer:" / "answer:", up to
/// the first period or line break, without surrounding quotes.
pub fn extract_core_answer(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    let core = core_answer_re()
        .and_then(|re| re.captures(flat))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(flat);
    core.trim().trim_matches(|c| c == '"' || c == '\'').to_string()
}

/// Reduce a submitted answer to what a grader compares: the code of a fenced
/// patch, or the core of a text answer. Failure markers pass through.
pub fn format_answer(answer: &str) -> String {
    if answer.starts_with(REPAIR_FAILURE_PREFIX) || answer.starts_with(ANALYSIS_FAILURE_PREFIX) {
        return answer.to_string();
    }
    if answer.contains("```") {
        extract_code_block(answer)
    } else {
        extract_core_answer(answer)
    }
}
