//! File-backed inputs and outputs of a run: task metadata, the JSON-lines
//! result log, and the submission array.

mod answers;
mod log;
mod metadata;
mod submission;

pub use answers::{extract_code_block, extract_core_answer, format_answer};
pub use log::{ResultLog, read_analysis_log};
pub use metadata::{read_metadata, record_from_value};
pub use submission::{read_submission, write_submission};
