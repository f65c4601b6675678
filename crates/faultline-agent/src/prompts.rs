//! Prompt text for every model call in the pipeline.
//!
//! Prompts are plain text with explicit `=== ... ===` delimiters so the
//! models see unambiguous section boundaries.

use serde::{Deserialize, Serialize};

/// A worked code fix used as a few-shot example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRepairExample {
    #[serde(default)]
    pub question: String,
    pub code: String,
    pub fix: String,
}

/// Worked question/answer pairs biasing the verifier toward terse answers.
const TEXT_REPAIR_EXAMPLES: &[(&str, &str, &str)] = &[
    (
        "How many studio albums did the band release between 2000 and 2009?",
        "The previous attempt counted live albums as studio albums; only three releases in the range are studio albums.",
        "3",
    ),
    (
        "What is the IOC country code of the nation with the fewest athletes at the 1928 Summer Olympics?",
        "The attempt sorted by medal count instead of athlete count; the smallest delegation was Cuba.",
        "CUB",
    ),
    (
        "Give the surname of the veterinarian mentioned in the exercise.",
        "The answer included the full name and a title although only the surname was requested.",
        "Louvrier",
    ),
];

const CAUSAL_OUTPUT_FORMAT: &str = "Output format:\n\
1. [Top-Level Causal Conclusion]: One-sentence summary of the core inference.\n\
2. [Causal Chain]:\n   \
a) Step 1 → Explanation of why this step occurs.\n   \
b) Step 2 → Explanation of its logical connection to Step 1.\n   \
c) Step 3 → Explanation of its relationship to earlier steps.\n   \
...\n\
Finally, include a brief summary highlighting the most important causal links and their implications.";

pub fn pseudo_steps_prompt(question: &str) -> String {
    format!(
        "You are preparing to solve the task below. Write a concise numbered list of the \
reasoning steps a careful solver would take to reach the answer. Output the steps only, \
one per line, without solving the task or adding commentary.\n\n\
=== Task Begin ===\n{}\n=== Task End ===\n",
        question.trim()
    )
}

pub fn causal_analysis_prompt(steps: &str, aux_text: &str) -> String {
    let mut prompt = format!(
        "Below is an annotator \"Steps\" sequence and, if available, supplementary information \
extracted from an auxiliary file. Produce a clear causal-chain analysis explaining how each \
step logically follows from the previous steps.\n\n\
=== Steps Begin ===\n{}\n=== Steps End ===\n\n",
        steps.trim()
    );
    let aux = aux_text.trim();
    if !aux.is_empty() {
        prompt.push_str(&format!(
            "=== Auxiliary Document Content Begin ===\n{aux}\n=== Auxiliary Document Content End ===\n\n"
        ));
    }
    prompt.push_str(CAUSAL_OUTPUT_FORMAT);
    prompt
}

pub fn code_repair_prompt(analysis: &str, code: &str, examples: &[CodeRepairExample]) -> String {
    let mut prompt = String::new();
    if !examples.is_empty() {
        prompt.push_str("Here are examples of buggy programs and their fixes.\n\n");
        for (idx, example) in examples.iter().enumerate() {
            prompt.push_str(&format!("### Example {}\n", idx + 1));
            if !example.question.trim().is_empty() {
                prompt.push_str(&format!("Task: {}\n", example.question.trim()));
            }
            prompt.push_str(&format!(
                "Buggy code:\n{}\nFixed code:\n{}\n\n",
                example.code.trim_end(),
                example.fix.trim_end()
            ));
        }
    }
    prompt.push_str(&format!(
        "Below is a causal-chain analysis of why a program failed, followed by the program.\n\n\
=== Causal Analysis Begin ===\n{}\n=== Causal Analysis End ===\n\n\
=== Original Code Begin ===\n{}\n=== Original Code End ===\n\n\
Detect the programming language of the original code. Output the complete patched program \
that fixes the root cause in a single fenced code block tagged with that language, then a \
short list of the changes:\n\n\
```<language>\n<patched program>\n```\n\nExplanation:\n- ...",
        analysis.trim(),
        code.trim_end()
    ));
    prompt
}

pub fn text_repair_prompt(question: &str, analysis: &str, few_shot: bool) -> String {
    let mut prompt = String::from(
        "Below is a question and a causal-chain analysis of a previous reasoning attempt. \
Provide only the corrected final answer in English: no reasoning, no explanation, no \
restating of the question. Prefer the shortest literal form (a number, a name, a code).\n\n",
    );
    if few_shot {
        for (question, analysis, answer) in TEXT_REPAIR_EXAMPLES {
            prompt.push_str(&format!(
                "Question:\n{question}\n\nCausal-Chain Analysis:\n{analysis}\n\nFinal Answer: {answer}\n\n---\n\n"
            ));
        }
    }
    prompt.push_str(&format!(
        "Question:\n{}\n\nCausal-Chain Analysis:\n{}\n\nFinal Answer:",
        question.trim(),
        analysis.trim()
    ));
    prompt
}
