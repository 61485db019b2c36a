//! Per-connection session state machine.
//!
//! Every connection starts out waiting for the shared secret.  The table
//! below is the whole protocol:
//!
//! ```text
//! AwaitingPassword ── line == secret ──► Authenticated   reply PASSED + welcome
//! AwaitingPassword ── line != secret ──► AwaitingPassword reply FAILED
//! Authenticated    ── "exit" (any case) ► Closed         no reply
//! Authenticated    ── other line ───────► Authenticated   reply "Echo: <line>"
//! any              ── EOF / I/O error ──► Closed          (driven by close())
//! ```
//!
//! Repeated wrong passwords neither advance nor regress the state, and there
//! is no lockout: a client may keep guessing for as long as the connection
//! stays open.

use std::fmt;

use tracing::trace;

use super::frames::{echo_reply, DEFAULT_WELCOME, EXIT_COMMAND, FAILED, PASSED};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; the next line is treated as a password attempt.
    AwaitingPassword,
    /// Secret verified; lines are echoed back.
    Authenticated,
    /// Terminal.  No further lines are processed.
    Closed,
}

/// What the connection handler must do after feeding a line to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Write each line back to the client, in order.
    Respond(Vec<String>),
    /// The session reached `Closed`; tear the connection down without replying.
    Close,
    /// The session was already closed; the line is discarded.
    Ignored,
}

/// The shared secret clients must present.
///
/// Comparison is byte-for-byte.  `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns `true` when `attempt` matches the secret exactly.
    pub fn matches(&self, attempt: &str) -> bool {
        self.0.as_bytes() == attempt.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Authentication and echo state for one connection.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    failed_attempts: u32,
    welcome: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates a session in `AwaitingPassword` with the default welcome line.
    pub fn new() -> Self {
        Self::with_welcome(DEFAULT_WELCOME)
    }

    /// Creates a session that sends `welcome` after a successful login.
    pub fn with_welcome(welcome: impl Into<String>) -> Self {
        Self {
            state: SessionState::AwaitingPassword,
            failed_attempts: 0,
            welcome: welcome.into(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Number of wrong passwords seen so far.  Informational only.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Advances the state machine with one inbound line.
    pub fn handle_line(&mut self, line: &str, secret: &Secret) -> SessionOutcome {
        match self.state {
            SessionState::AwaitingPassword => {
                if secret.matches(line) {
                    self.state = SessionState::Authenticated;
                    trace!("session authenticated after {} failed attempts", self.failed_attempts);
                    SessionOutcome::Respond(vec![PASSED.to_string(), self.welcome.clone()])
                } else {
                    self.failed_attempts = self.failed_attempts.saturating_add(1);
                    SessionOutcome::Respond(vec![FAILED.to_string()])
                }
            }
            SessionState::Authenticated => {
                if line.eq_ignore_ascii_case(EXIT_COMMAND) {
                    self.state = SessionState::Closed;
                    trace!("session closed by exit command");
                    SessionOutcome::Close
                } else {
                    SessionOutcome::Respond(vec![echo_reply(line)])
                }
            }
            SessionState::Closed => SessionOutcome::Ignored,
        }
    }

    /// Moves the session to `Closed`.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Secret {
        Secret::new("admin123")
    }

    fn authenticated() -> Session {
        let mut session = Session::new();
        session.handle_line("admin123", &secret());
        session
    }

    #[test]
    fn test_new_session_awaits_password() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::AwaitingPassword);
        assert_eq!(session.failed_attempts(), 0);
    }

    #[test]
    fn test_correct_password_replies_passed_then_welcome() {
        // Arrange
        let mut session = Session::with_welcome("hi there");

        // Act
        let outcome = session.handle_line("admin123", &secret());

        // Assert
        assert_eq!(
            outcome,
            SessionOutcome::Respond(vec!["PASSED".to_string(), "hi there".to_string()])
        );
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[test]
    fn test_wrong_password_replies_failed_and_stays_put() {
        let mut session = Session::new();

        let outcome = session.handle_line("wrong", &secret());

        assert_eq!(outcome, SessionOutcome::Respond(vec!["FAILED".to_string()]));
        assert_eq!(session.state(), SessionState::AwaitingPassword);
        assert_eq!(session.failed_attempts(), 1);
    }

    #[test]
    fn test_password_comparison_is_exact() {
        let mut session = Session::new();

        for attempt in ["ADMIN123", "admin123 ", " admin123", "admin12", ""] {
            let outcome = session.handle_line(attempt, &secret());
            assert_eq!(
                outcome,
                SessionOutcome::Respond(vec!["FAILED".to_string()]),
                "attempt {attempt:?} must fail"
            );
        }
        assert_eq!(session.state(), SessionState::AwaitingPassword);
    }

    #[test]
    fn test_many_failures_do_not_block_a_later_success() {
        let mut session = Session::new();
        for _ in 0..1_000 {
            session.handle_line("nope", &secret());
        }

        let outcome = session.handle_line("admin123", &secret());

        assert!(matches!(outcome, SessionOutcome::Respond(ref lines) if lines[0] == "PASSED"));
        assert_eq!(session.failed_attempts(), 1_000);
    }

    #[test]
    fn test_authenticated_line_is_echoed() {
        let mut session = authenticated();

        let outcome = session.handle_line("ping", &secret());

        assert_eq!(
            outcome,
            SessionOutcome::Respond(vec!["Echo: ping".to_string()])
        );
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[test]
    fn test_password_after_login_is_just_echoed() {
        let mut session = authenticated();

        let outcome = session.handle_line("admin123", &secret());

        assert_eq!(
            outcome,
            SessionOutcome::Respond(vec!["Echo: admin123".to_string()])
        );
    }

    #[test]
    fn test_exit_in_any_case_closes_without_reply() {
        for word in ["exit", "EXIT", "eXiT"] {
            let mut session = authenticated();

            let outcome = session.handle_line(word, &secret());

            assert_eq!(outcome, SessionOutcome::Close);
            assert!(session.is_closed());
        }
    }

    #[test]
    fn test_exit_before_login_is_a_wrong_password() {
        let mut session = Session::new();

        let outcome = session.handle_line("exit", &secret());

        assert_eq!(outcome, SessionOutcome::Respond(vec!["FAILED".to_string()]));
        assert_eq!(session.state(), SessionState::AwaitingPassword);
    }

    #[test]
    fn test_exit_with_padding_is_echoed() {
        let mut session = authenticated();

        let outcome = session.handle_line("exit ", &secret());

        assert_eq!(
            outcome,
            SessionOutcome::Respond(vec!["Echo: exit ".to_string()])
        );
    }

    #[test]
    fn test_closed_session_ignores_lines() {
        let mut session = authenticated();
        session.handle_line("exit", &secret());

        assert_eq!(session.handle_line("ping", &secret()), SessionOutcome::Ignored);
    }

    #[test]
    fn test_close_reports_transition_only_once() {
        let mut session = Session::new();

        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_closed());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let rendered = format!("{:?}", secret());
        assert!(!rendered.contains("admin123"));
    }
}
