use crate::ExtractError;
use std::ffi::OsStr;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Run `program` with `args` and return its stdout, killing it after `timeout`.
///
/// Stdout and stderr are drained on helper threads so a chatty child cannot
/// fill either pipe and stall before the deadline.
pub fn run_capture<I, S>(program: &str, args: I, timeout: Duration) -> Result<String, ExtractError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExtractError::Ocr(format!("failed to run `{program}`: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExtractError::Ocr("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExtractError::Ocr("stderr not captured".to_string()))?;
    let out_reader = drain(stdout);
    let err_reader = drain(stderr);

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractError::Ocr(format!(
                "`{program}` timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    let out = out_reader
        .join()
        .map_err(|_| ExtractError::Ocr("stdout reader panicked".to_string()))??;
    if !status.success() {
        let stderr = err_reader
            .join()
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        return Err(ExtractError::Ocr(format!(
            "`{program}` exited with {status}: {}",
            String::from_utf8_lossy(&stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&out).to_string())
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf).map(|_| buf)
    })
}
