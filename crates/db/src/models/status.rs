//! Job status state machine.
//!
//! Maps onto the `job_status` Postgres enum. Transitions are monotonic:
//! `pending → processing → {completed | failed}`. A `processing` row may be
//! re-entered by a redelivered message. Only a `processing` row can fail.
//! Terminal rows never change.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a row in `self` may be written with status `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::JobStatus::*;
    use super::*;

    const ALL: [JobStatus; 4] = [Pending, Processing, Completed, Failed];

    #[test]
    fn terminal_statuses_admit_nothing() {
        for from in [Completed, Failed] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn never_regresses_to_pending() {
        for from in ALL {
            assert!(!from.can_transition_to(Pending), "{from} -> pending");
        }
    }

    #[test]
    fn completion_requires_processing() {
        assert!(!Pending.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Completed));
    }

    #[test]
    fn failure_requires_processing() {
        assert!(!Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Failed));
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Processing).unwrap(), "\"processing\"");
    }
}
