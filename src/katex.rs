//! External math renderer adapter.
//!
//! Formulas are not rendered during the substitution pass; the parser emits
//! opaque placeholders and this module resolves them in a post-pass, one
//! blocking round-trip per formula. The channel is line-oriented: a request
//! is the formula source with newlines collapsed to spaces, trimmed and
//! CRLF-terminated; the response is one line whose first character is a
//! status flag (`1` = success) followed immediately by the rendered markup
//! or the error detail.
//!
//! The renderer is an injectable dependency so tests can substitute a
//! deterministic fake.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::LazyLock;

use log::warn;
use regex::Regex;

use crate::error::{Error, Result};
use crate::parser::{MATH_CLOSE, MATH_OPEN, MATH_SEP};

/// Respawn budget for a dead renderer channel. Renderer-reported failures
/// are never retried; only channel I/O errors consume the budget.
const MAX_RESPAWNS: u32 = 3;

/// Outcome of a single formula request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Rendered markup, ready to embed.
    Html(String),
    /// The renderer reported failure; the payload is its error detail.
    Failed(String),
}

/// A formula renderer: string in, markup (or reported failure) out.
pub trait MathRenderer {
    fn render(&mut self, tex: &str) -> Result<RenderOutcome>;
}

/// The production renderer: a persistent child process spoken to over the
/// line protocol, one in-flight request at a time.
pub struct KatexProcess {
    command: Vec<String>,
    channel: Option<Channel>,
    respawns: u32,
}

struct Channel {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Channel {
    fn spawn(command: &[String]) -> io::Result<Channel> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::other("empty renderer command"))?;
        let mut process = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("renderer stdin unavailable"))?;
        let stdout = process
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| io::Error::other("renderer stdout unavailable"))?;
        Ok(Channel {
            process,
            stdin,
            stdout,
        })
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl KatexProcess {
    /// Create a renderer for the given command line. The child is spawned
    /// lazily on the first request.
    pub fn new(command: Vec<String>) -> KatexProcess {
        KatexProcess {
            command,
            channel: None,
            respawns: 0,
        }
    }

    fn ensure_channel(&mut self) -> io::Result<&mut Channel> {
        if self.channel.is_none() {
            self.channel = Some(Channel::spawn(&self.command)?);
        }
        self.channel
            .as_mut()
            .ok_or_else(|| io::Error::other("renderer channel unavailable"))
    }

    fn round_trip(&mut self, request: &str) -> io::Result<String> {
        let channel = self.ensure_channel()?;
        channel.stdin.write_all(request.as_bytes())?;
        channel.stdin.flush()?;
        let mut line = String::new();
        if channel.stdout.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "renderer closed its output",
            ));
        }
        Ok(line.trim_end().to_string())
    }
}

impl MathRenderer for KatexProcess {
    fn render(&mut self, tex: &str) -> Result<RenderOutcome> {
        let request = format!("{}\r\n", tex.replace('\n', " ").trim());
        loop {
            match self.round_trip(&request) {
                Ok(line) => {
                    return Ok(match line.strip_prefix('1') {
                        Some(html) => RenderOutcome::Html(html.to_string()),
                        None => {
                            let mut chars = line.chars();
                            chars.next();
                            let detail = chars.as_str();
                            RenderOutcome::Failed(if detail.is_empty() {
                                "empty renderer response".to_string()
                            } else {
                                detail.to_string()
                            })
                        }
                    });
                }
                Err(err) => {
                    self.channel = None;
                    if self.respawns >= MAX_RESPAWNS {
                        return Err(Error::Renderer(format!(
                            "channel failed after {MAX_RESPAWNS} restarts: {err}"
                        )));
                    }
                    self.respawns += 1;
                    warn!(
                        "math renderer channel failed ({err}); restarting ({}/{MAX_RESPAWNS})",
                        self.respawns
                    );
                }
            }
        }
    }
}

static MATH_PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "(?s){MATH_OPEN}(.*?){MATH_SEP}(.*?){MATH_CLOSE}"
    ))
    .expect("math placeholder pattern must compile")
});

/// Resolve all deferred math placeholders in a substituted body, in document
/// order. A renderer-reported failure falls back to the original source in
/// literal dollar delimiters (single or double per the recorded mode); only
/// a dead channel is fatal.
pub fn render_math_placeholders(body: &str, renderer: &mut dyn MathRenderer) -> Result<String> {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for caps in MATH_PLACEHOLDER_RE.captures_iter(body) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        out.push_str(&body[last..whole.start()]);
        last = whole.end();
        let mode = &caps[1];
        let tex = &caps[2];
        match renderer.render(tex)? {
            RenderOutcome::Html(html) => out.push_str(&html),
            RenderOutcome::Failed(detail) => {
                warn!("math renderer failed ({detail}); emitting literal source");
                if mode == "inline" {
                    out.push_str(&format!("${tex}$"));
                } else {
                    out.push_str(&format!("$${tex}$$"));
                }
            }
        }
    }
    out.push_str(&body[last..]);
    Ok(out)
}
