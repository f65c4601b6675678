//! Test doubles shared by the pipeline and CLI tests.

use anyhow::Result;
use faultline_core::TaskRecord;
use faultline_llm::{CompletionClient, CompletionError, CompletionRequest, TokenStream};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// What a scripted call answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fragments(Vec<String>),
    Error(CompletionError),
    /// Yields `fragments`, then fails mid-stream.
    BrokenStream {
        fragments: Vec<String>,
        error: CompletionError,
    },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn fragments<S: Into<String>>(fragments: Vec<S>) -> Self {
        Reply::Fragments(fragments.into_iter().map(Into::into).collect())
    }

    pub fn unavailable() -> Self {
        Reply::Error(CompletionError::Api {
            status: 503,
            detail: "model is loading".to_string(),
        })
    }
}

#[derive(Default)]
struct ScriptState {
    prompt_rules: Vec<(String, VecDeque<Reply>)>,
    queued: HashMap<String, VecDeque<Reply>>,
    defaults: HashMap<String, Reply>,
    requests: Vec<CompletionRequest>,
}

/// Fake completion client answering from a script.
///
/// Lookup order per call: the first prompt rule whose needle occurs in the
/// prompt (its queue is consumed until one reply is left, which then
/// repeats), then the model's one-shot queue, then the model's default.
#[derive(Default)]
pub struct ScriptedClient {
    state: Mutex<ScriptState>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call for `model` with `reply` once its queue is empty.
    pub fn reply(self, model: &str, reply: Reply) -> Self {
        self.with_state(|s| {
            s.defaults.insert(model.to_string(), reply);
        });
        self
    }

    /// Queue a one-shot reply for `model`.
    pub fn push(self, model: &str, reply: Reply) -> Self {
        self.with_state(|s| {
            s.queued.entry(model.to_string()).or_default().push_back(reply);
        });
        self
    }

    /// Answer prompts containing `needle` with `replies` in order.
    pub fn when_prompt_contains(self, needle: &str, replies: Vec<Reply>) -> Self {
        self.with_state(|s| {
            s.prompt_rules
                .push((needle.to_string(), replies.into_iter().collect()));
        });
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    pub fn requests_for(&self, model: &str) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.model == model)
            .collect()
    }

    fn with_state(&self, f: impl FnOnce(&mut ScriptState)) {
        if let Ok(mut guard) = self.state.lock() {
            f(&mut guard);
        }
    }

    fn next_reply(&self, req: &CompletionRequest) -> Result<Reply, CompletionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CompletionError::Transport("script lock poisoned".to_string()))?;
        state.requests.push(req.clone());

        for (needle, replies) in state.prompt_rules.iter_mut() {
            if req.prompt.contains(needle.as_str()) {
                let reply = if replies.len() > 1 {
                    replies.pop_front()
                } else {
                    replies.front().cloned()
                };
                if let Some(reply) = reply {
                    return Ok(reply);
                }
            }
        }
        if let Some(reply) = state
            .queued
            .get_mut(&req.model)
            .and_then(VecDeque::pop_front)
        {
            return Ok(reply);
        }
        state.defaults.get(&req.model).cloned().ok_or_else(|| {
            CompletionError::Malformed(format!("no scripted reply for model {}", req.model))
        })
    }
}

impl CompletionClient for ScriptedClient {
    fn complete_text(&self, req: &CompletionRequest) -> Result<String, CompletionError> {
        match self.next_reply(req)? {
            Reply::Text(text) => Ok(text),
            Reply::Fragments(fragments) => Ok(fragments.concat()),
            Reply::Error(err) | Reply::BrokenStream { error: err, .. } => Err(err),
        }
    }

    fn complete_stream(&self, req: &CompletionRequest) -> Result<TokenStream, CompletionError> {
        match self.next_reply(req)? {
            Reply::Text(text) => Ok(TokenStream::from_fragments(vec![text])),
            Reply::Fragments(fragments) => Ok(TokenStream::from_fragments(fragments)),
            Reply::Error(err) => Err(err),
            Reply::BrokenStream { fragments, error } => {
                let items: Vec<Result<String, CompletionError>> = fragments
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(error)))
                    .collect();
                Ok(TokenStream::new(items.into_iter()))
            }
        }
    }
}

pub fn task(task_id: &str, question: &str, steps: &str) -> TaskRecord {
    TaskRecord {
        task_id: task_id.to_string(),
        question: question.to_string(),
        steps_text: steps.to_string(),
        ..TaskRecord::default()
    }
}

/// Write `tasks` as flat-layout JSON lines.
pub fn write_metadata_jsonl(path: &Path, tasks: &[TaskRecord]) -> Result<()> {
    let mut body = String::new();
    for t in tasks {
        let mut value = serde_json::json!({
            "task_id": t.task_id,
            "question": t.question,
            "steps": t.steps_text,
        });
        for (key, field) in [
            ("file_name", &t.file_name),
            ("file_path", &t.file_path),
            ("code", &t.code),
        ] {
            if let Some(v) = field {
                value[key] = serde_json::Value::String(v.clone());
            }
        }
        body.push_str(&serde_json::to_string(&value)?);
        body.push('\n');
    }
    fs::write(path, body)?;
    Ok(())
}

/// Single-page PDF drawing `text` with a Helvetica font.
pub fn text_pdf(text: &str) -> Vec<u8> {
    single_page_pdf(
        "<< /Font << /F1 << /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >> >> >>",
        &format!("BT /F1 12 Tf 72 712 Td ({text}) Tj ET"),
    )
}

/// Single-page PDF whose content selects a font missing from its resources.
pub fn pdf_with_undefined_font(text: &str) -> Vec<u8> {
    single_page_pdf("<< >>", &format!("BT /F9 12 Tf 72 712 Td ({text}) Tj ET"))
}

/// PDF with one page, the given resource dictionary and content stream, and
/// a correct cross-reference table.
pub fn single_page_pdf(resources: &str, content: &str) -> Vec<u8> {
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources {resources} /Contents 4 0 R >>"
        ),
        format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()),
    ];
    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    out
}
