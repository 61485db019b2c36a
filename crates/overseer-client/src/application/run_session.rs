//! Interactive session use case.
//!
//! ```text
//! server greeting ─► print
//! REQUEST_PASSWORD ─► prompt, send password ─► PASSED? ──no──┐
//!                           ▲                                │
//!                           └────────────────────────────────┘
//! welcome line ─► print
//! loop: read user line ─► send ─► "exit"? stop : print echo
//! ```
//!
//! Input and output are generic so tests can drive a whole session from an
//! in-memory script.  End of input while prompting for a password ends the
//! session without authenticating; end of input in the echo loop sends
//! `exit` so the server closes cleanly.

use std::io::{BufRead, Write};

use overseer_core::protocol::frames::EXIT_COMMAND;
use tracing::{debug, warn};

use crate::infrastructure::network::{AuthReply, ClientError, SessionClient};

/// What happened during a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub authenticated: bool,
    pub failed_attempts: u32,
    /// Echo replies received from the server.
    pub echoes: Vec<String>,
}

/// Runs one conversation over `client`.
///
/// `password`, when given, is tried first; if the server rejects it the
/// user is prompted on `input` like any other failed attempt.
///
/// # Errors
///
/// Returns [`ClientError`] if the connection fails, or
/// [`ClientError::Closed`] if the server hangs up mid-session.
pub fn run_session<R: BufRead, W: Write>(
    client: &mut SessionClient,
    input: &mut R,
    output: &mut W,
    password: Option<&str>,
) -> Result<SessionSummary, ClientError> {
    let mut summary = SessionSummary::default();

    let greeting = client.read_greeting()?;
    writeln!(output, "{}", greeting.text)?;
    if greeting.password_requested {
        writeln!(output, "Server requested password. Please enter:")?;
    } else {
        warn!("server did not request a password; trying anyway");
    }

    let mut preset = password.map(str::to_string);
    loop {
        let attempt = match preset.take() {
            Some(p) => p,
            None => match read_input(input)? {
                Some(line) => line,
                None => return Ok(summary),
            },
        };
        match client.authenticate(&attempt)? {
            AuthReply::Passed => {
                writeln!(output, "Password accepted.")?;
                summary.authenticated = true;
                break;
            }
            AuthReply::Failed => {
                summary.failed_attempts += 1;
                writeln!(output, "Wrong password, try again.")?;
            }
            AuthReply::Unknown(reply) => {
                summary.failed_attempts += 1;
                writeln!(output, "Unknown response: {reply}")?;
            }
        }
    }

    let welcome = client.read_line()?.ok_or(ClientError::Closed)?;
    writeln!(output, "{welcome}")?;
    writeln!(output, "Type messages (or '{EXIT_COMMAND}' to quit):")?;

    loop {
        let line = read_input(input)?.unwrap_or_else(|| EXIT_COMMAND.to_string());
        client.send_line(&line)?;
        if line.eq_ignore_ascii_case(EXIT_COMMAND) {
            debug!("exit sent; session over");
            break;
        }
        let echo = client.read_line()?.ok_or(ClientError::Closed)?;
        writeln!(output, "{echo}")?;
        summary.echoes.push(echo);
    }
    output.flush()?;
    Ok(summary)
}

/// Next line of user input without its terminator, or `None` at end of input.
fn read_input<R: BufRead>(input: &mut R) -> Result<Option<String>, ClientError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
