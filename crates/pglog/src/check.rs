//! Pre-flight check: can this sink reach its database and prepare its insert?
//!
//! The check runs the same first two steps as a flush and stops before any
//! row is written, so a misspelled table or column shows up at startup.

use std::fmt;
use std::time::Duration;

/// One step of the pre-flight check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStep {
    /// Open a session with the configured credentials
    Connect,
    /// Prepare the configured insert under its statement name
    Prepare,
}

impl CheckStep {
    /// Lowercase step name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Prepare => "prepare",
        }
    }
}

/// Outcome of a single step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Which step
    pub step: CheckStep,
    /// Wall time spent in the step
    pub elapsed: Duration,
    /// Failure message; `None` when the step passed
    pub error: Option<String>,
}

impl StepOutcome {
    pub(crate) fn passed(step: CheckStep, elapsed: Duration) -> Self {
        Self {
            step,
            elapsed,
            error: None,
        }
    }

    pub(crate) fn failed(step: CheckStep, elapsed: Duration, error: impl fmt::Display) -> Self {
        Self {
            step,
            elapsed,
            error: Some(error.to_string()),
        }
    }

    /// Whether the step passed
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Steps in the order they ran. A failed step ends the check.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    steps: Vec<StepOutcome>,
}

impl CheckReport {
    pub(crate) fn push(&mut self, outcome: StepOutcome) {
        self.steps.push(outcome);
    }

    /// Whether both steps ran and passed
    pub fn is_ok(&self) -> bool {
        self.steps.len() == 2 && self.steps.iter().all(StepOutcome::is_ok)
    }

    /// The step that ended the check, if any
    pub fn failure(&self) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| !s.is_ok())
    }

    /// Every step that ran
    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, outcome) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match &outcome.error {
                None => write!(
                    f,
                    "{} ok ({}ms)",
                    outcome.step.as_str(),
                    outcome.elapsed.as_millis()
                )?,
                Some(e) => write!(f, "{} failed: {}", outcome.step.as_str(), e)?,
            }
        }
        Ok(())
    }
}
