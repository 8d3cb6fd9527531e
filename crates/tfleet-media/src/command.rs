//! External command runner.
//!
//! Commands are given as a shell command line template. Tokens of the form
//! `:name` that start a line or follow whitespace are replaced by the
//! matching parameter; tokens without a matching parameter are left as-is so
//! templates can be filled in stages.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::Instant;

use regex::{Captures, Regex};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{CommandError, CommandResult};

/// Maximum number of output bytes kept for failure diagnostics.
pub const OUTPUT_BUFFER_LIMIT: usize = 10 * 1024;

const TRUNCATION_MARKER: &str = "[...]";

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Named values substituted into a command line template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams(BTreeMap<String, String>);

impl CommandParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for CommandParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

fn substitution_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)(^|\s):(\w+)").expect("valid substitution pattern"))
}

/// Output kept for diagnostics, capped at a byte limit.
#[derive(Debug)]
struct OutputBuffer {
    text: String,
    limit: usize,
    exceeded: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            exceeded: false,
        }
    }

    fn push(&mut self, text: &str) {
        if self.exceeded {
            return;
        }
        let remaining = self.limit - self.text.len();
        if text.len() <= remaining {
            self.text.push_str(text);
            return;
        }
        let mut cut = remaining;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&text[..cut]);
        self.discard();
    }

    /// Mark the buffer as truncated; nothing is kept after this.
    fn discard(&mut self) {
        if !self.exceeded {
            self.exceeded = true;
            self.text.push_str(TRUNCATION_MARKER);
        }
    }

    fn into_string(self) -> String {
        self.text
    }
}

/// One `\n` or `\r` terminated piece of output.
struct Segment<'a> {
    text: Cow<'a, str>,
    terminator: Option<char>,
    /// Bytes past the segment limit were dropped
    truncated: bool,
}

/// Splits raw output into segments, keeping at most `limit` bytes of each.
struct SegmentSplitter {
    pending: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl SegmentSplitter {
    fn new(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn feed<F: FnMut(Segment<'_>)>(&mut self, bytes: &[u8], mut emit: F) {
        for &byte in bytes {
            match byte {
                b'\n' | b'\r' => self.flush(Some(byte as char), &mut emit),
                _ if self.pending.len() < self.limit => self.pending.push(byte),
                _ => self.truncated = true,
            }
        }
    }

    /// Emit whatever is left after the stream ended without a terminator.
    fn finish<F: FnMut(Segment<'_>)>(&mut self, mut emit: F) {
        if !self.pending.is_empty() || self.truncated {
            self.flush(None, &mut emit);
        }
    }

    fn flush<F: FnMut(Segment<'_>)>(&mut self, terminator: Option<char>, emit: &mut F) {
        emit(Segment {
            text: String::from_utf8_lossy(&self.pending),
            terminator,
            truncated: self.truncated,
        });
        self.pending.clear();
        self.truncated = false;
    }
}

/// Runs a command line template with combined stdout/stderr streaming.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    command_line: String,
    program: String,
    ignore_exit_code: bool,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl CommandRunner {
    /// Create a runner for a command line template.
    pub fn new(command_line: impl Into<String>) -> Self {
        let command_line = command_line.into();
        let program = command_line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            command_line,
            program,
            ignore_exit_code: false,
            cancel_rx: None,
        }
    }

    /// Return `Ok(false)` instead of failing on a non-zero exit code.
    pub fn ignore_exit_code(mut self, ignore: bool) -> Self {
        self.ignore_exit_code = ignore;
        self
    }

    /// Set cancellation signal. The process is killed once it reads `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// First word of the command line.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Substitute `params` into the template.
    pub fn compose(&self, params: &CommandParams) -> String {
        if params.is_empty() {
            return self.command_line.clone();
        }
        substitution_pattern()
            .replace_all(&self.command_line, |caps: &Captures| {
                match params.get(&caps[2]) {
                    Some(value) if value.chars().any(char::is_whitespace) => {
                        format!("{}'{}'", &caps[1], value)
                    }
                    Some(value) => format!("{}{}", &caps[1], value),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Run the command.
    ///
    /// Returns `Ok(true)` on a zero exit and `Ok(false)` on a non-zero exit
    /// when exit codes are ignored.
    pub async fn run(&self, params: &CommandParams) -> CommandResult<bool> {
        self.run_with_output(params, |_| {}).await
    }

    /// Run the command, passing every output line to `on_line` as it arrives.
    ///
    /// Lines containing carriage returns (progress meters) are split and each
    /// segment is passed separately.
    pub async fn run_with_output<F>(&self, params: &CommandParams, mut on_line: F) -> CommandResult<bool>
    where
        F: FnMut(&str),
    {
        let command_line = self.compose(params);
        let mut cancel = self.cancel_rx.clone();
        if is_cancelled(&cancel) {
            return Err(CommandError::Cancelled);
        }

        info!(command = %self.program, "Running: {} 2>&1", command_line);
        let started = Instant::now();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("exec 2>&1\n{}", command_line))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            CommandError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "stdout not captured",
            ))
        })?;
        let mut output = OutputBuffer::new(OUTPUT_BUFFER_LIMIT);
        let mut splitter = SegmentSplitter::new(OUTPUT_BUFFER_LIMIT);
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let read = tokio::select! {
                read = stdout.read(&mut chunk) => read?,
                _ = wait_for_cancel(&mut cancel) => {
                    warn!(command = %self.program, "Command cancelled, killing process");
                    return Err(CommandError::Cancelled);
                }
            };
            if read == 0 {
                break;
            }
            splitter.feed(&chunk[..read], |segment| {
                record_segment(&self.program, segment, &mut output, &mut on_line)
            });
        }
        splitter.finish(|segment| record_segment(&self.program, segment, &mut output, &mut on_line));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = wait_for_cancel(&mut cancel) => {
                warn!(command = %self.program, "Command cancelled, killing process");
                return Err(CommandError::Cancelled);
            }
        };

        match status.code() {
            Some(0) => {
                info!(
                    command = %self.program,
                    "Finished in {:.3} secs",
                    started.elapsed().as_secs_f64()
                );
                Ok(true)
            }
            Some(code) if self.ignore_exit_code => {
                debug!(command = %self.program, "Ignoring exit code {}", code);
                Ok(false)
            }
            Some(code) => Err(CommandError::execution_failed(
                format!("Command failed with exit code {}: {}", code, command_line),
                output.into_string(),
            )),
            None => Err(CommandError::execution_failed(
                format!("{}: {}", describe_abnormal_exit(&status), command_line),
                output.into_string(),
            )),
        }
    }
}

fn record_segment<F: FnMut(&str)>(
    program: &str,
    segment: Segment<'_>,
    output: &mut OutputBuffer,
    on_line: &mut F,
) {
    output.push(&segment.text);
    if segment.truncated {
        output.discard();
    }
    if let Some(terminator) = segment.terminator {
        output.push(terminator.encode_utf8(&mut [0; 4]));
    }
    if !segment.text.is_empty() {
        info!(command = %program, "--> {}", segment.text.trim());
        on_line(&segment.text);
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

/// Resolves once the cancellation flag is set. Never resolves without one.
async fn wait_for_cancel(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

#[cfg(unix)]
fn describe_abnormal_exit(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    if let Some(signal) = status.stopped_signal() {
        format!("Command stopped unexpectedly with signal {}", signal)
    } else if let Some(signal) = status.signal() {
        format!("Command died unexpectedly by signal {}", signal)
    } else {
        "Command died unexpectedly".to_string()
    }
}

#[cfg(not(unix))]
fn describe_abnormal_exit(_status: &ExitStatus) -> String {
    "Command died unexpectedly".to_string()
}

/// Check that an external tool is available.
pub fn check_tool(name: &str) -> CommandResult<PathBuf> {
    which::which(name).map_err(|_| CommandError::ToolNotFound(name.to_string()))
}
