//! # Console Mailer
//!
//! Delivers access codes by writing one notice per evaluator to a sink
//! (stdout for the binary). Operators forward the notices by hand or pipe
//! them into their mail tooling.

use capstone_core::{AccessCodeMailer, CapstoneError, Phase};
use chrono::{NaiveDate, NaiveTime};
use std::io::Write;

pub struct ConsoleMailer<W: Write> {
    out: W,
    sent: usize,
}

impl ConsoleMailer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleMailer<W> {
    pub fn new(out: W) -> Self {
        Self { out, sent: 0 }
    }

    /// Notices written so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> AccessCodeMailer for ConsoleMailer<W> {
    fn send_access_code(
        &mut self,
        email: &str,
        code: &str,
        phase: Phase,
        room: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), CapstoneError> {
        writeln!(
            self.out,
            "To: {}\n  Access code: {}\n  {} defense, {} on {} at {}\n",
            email,
            code,
            phase,
            room,
            date,
            time.format("%H:%M")
        )
        .map_err(|e| CapstoneError::Io(format!("Cannot deliver access code: {}", e)))?;
        self.sent += 1;
        tracing::debug!(%email, %phase, "access code notice written");
        Ok(())
    }
}
