use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Repeatedly, per a 5-field cron expression.
    Cron,
    /// Once, at an absolute UTC instant; removed from the store after firing.
    At,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Cron => f.write_str("cron"),
            JobKind::At => f.write_str("at"),
        }
    }
}

/// A persisted scheduled task.
///
/// Serialized field order is the canonical store order — keep it stable so
/// store rewrites stay byte-comparable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    /// 5-field cron expression; required when `kind = cron`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// Absolute UTC fire instant; required when `kind = at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_time: Option<DateTime<Utc>>,
    /// Prompt delivered to the agent when the job fires.
    pub task: String,
    /// Agent template to run the task with. Empty means the default agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Session that receives the job result (unless `silent`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_to_session: Option<String>,
    pub silent: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// On-disk form of a [`Job`] before normalization.
///
/// Loose on purpose: `kind` and `created_at` may be missing (older stores),
/// the kind string is case-insensitive, and the legacy name
/// `creator_session_key` is accepted for `report_to_session`.
#[derive(Debug, Deserialize)]
pub struct JobWire {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub at_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default, alias = "creator_session_key")]
    pub report_to_session: Option<String>,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<JobWire> for Job {
    type Error = SchedulerError;

    /// Normalize and validate one record: trim string fields, lowercase the
    /// kind (defaulting to `at` iff `at_time` is set, else `cron`), stamp a
    /// missing `created_at` with now, then check required fields.
    fn try_from(wire: JobWire) -> Result<Job> {
        let id = wire.id.trim().to_string();
        let task = wire.task.trim().to_string();

        let kind = match wire.kind.as_deref().map(|k| k.trim().to_ascii_lowercase()) {
            Some(ref k) if k == "cron" => JobKind::Cron,
            Some(ref k) if k == "at" => JobKind::At,
            Some(ref k) if !k.is_empty() => {
                return Err(SchedulerError::InvalidJob {
                    id,
                    reason: format!("unknown kind: {k}"),
                })
            }
            _ if wire.at_time.is_some() => JobKind::At,
            _ => JobKind::Cron,
        };

        let job = Job {
            id,
            kind,
            expr: wire
                .expr
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            at_time: wire.at_time,
            task,
            agent: wire
                .agent
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
            report_to_session: wire
                .report_to_session
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            silent: wire.silent,
            enabled: wire.enabled,
            created_at: wire.created_at.unwrap_or_else(Utc::now),
        };
        job.validate()?;
        Ok(job)
    }
}

impl Job {
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| SchedulerError::InvalidJob {
            id: self.id.clone(),
            reason,
        };

        if self.id.is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        if self.task.is_empty() {
            return Err(invalid("task must not be empty".to_string()));
        }
        match self.kind {
            JobKind::Cron => {
                let expr = self
                    .expr
                    .as_deref()
                    .ok_or_else(|| invalid("cron job requires expr".to_string()))?;
                CronExpr::parse(expr)?;
            }
            JobKind::At => {
                if self.at_time.is_none() {
                    return Err(invalid("at job requires at_time".to_string()));
                }
            }
        }
        if !self.silent && self.report_to_session.is_none() {
            return Err(invalid(
                "non-silent job requires report_to_session".to_string(),
            ));
        }
        Ok(())
    }

    /// The human-readable config block placed at the top of a fire message.
    pub fn describe(&self) -> String {
        let opt = |value: Option<&str>| value.unwrap_or("-").to_string();
        format!(
            "[Cron job fired]\n\
             - id: {}\n\
             - kind: {}\n\
             - expr: {}\n\
             - at_time: {}\n\
             - task: {}\n\
             - agent: {}\n\
             - report_to_session: {}\n\
             - silent: {}\n\
             - created_at: {}",
            self.id,
            self.kind,
            opt(self.expr.as_deref()),
            self.at_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            self.task,
            opt(self.agent.as_deref()),
            opt(self.report_to_session.as_deref()),
            self.silent,
            self.created_at.to_rfc3339(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(json: &str) -> JobWire {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn kind_defaults_to_at_when_at_time_present() {
        let job = Job::try_from(wire(
            r#"{"id":"j","task":"t","silent":true,"at_time":"2099-01-01T00:00:00Z"}"#,
        ))
        .unwrap();
        assert_eq!(job.kind, JobKind::At);
    }

    #[test]
    fn kind_defaults_to_cron_otherwise() {
        let job = Job::try_from(wire(
            r#"{"id":"j","task":"t","silent":true,"expr":"* * * * *"}"#,
        ))
        .unwrap();
        assert_eq!(job.kind, JobKind::Cron);
    }

    #[test]
    fn kind_is_case_insensitive() {
        let job = Job::try_from(wire(
            r#"{"id":"j","kind":"CRON","task":"t","silent":true,"expr":"* * * * *"}"#,
        ))
        .unwrap();
        assert_eq!(job.kind, JobKind::Cron);
    }

    #[test]
    fn empty_id_or_task_rejected() {
        assert!(Job::try_from(wire(r#"{"id":"","task":"t","silent":true,"expr":"* * * * *"}"#)).is_err());
        assert!(Job::try_from(wire(r#"{"id":"j","task":"  ","silent":true,"expr":"* * * * *"}"#)).is_err());
    }

    #[test]
    fn cron_without_expr_rejected() {
        assert!(Job::try_from(wire(r#"{"id":"j","kind":"cron","task":"t","silent":true}"#)).is_err());
    }

    #[test]
    fn legacy_creator_session_key_is_accepted() {
        let job = Job::try_from(wire(
            r#"{"id":"j","task":"t","expr":"* * * * *","creator_session_key":"main"}"#,
        ))
        .unwrap();
        assert_eq!(job.report_to_session.as_deref(), Some("main"));
    }

    #[test]
    fn non_silent_without_target_rejected() {
        assert!(Job::try_from(wire(r#"{"id":"j","task":"t","expr":"* * * * *"}"#)).is_err());
    }

    #[test]
    fn missing_created_at_is_stamped() {
        let job = Job::try_from(wire(
            r#"{"id":"j","task":"t","silent":true,"expr":"* * * * *"}"#,
        ))
        .unwrap();
        assert!(job.created_at <= Utc::now());
    }

    #[test]
    fn describe_lists_the_whole_config() {
        let job = Job::try_from(wire(
            r#"{"id":"daily","kind":"cron","expr":"*/1 * * * *","task":"ping","report_to_session":"main"}"#,
        ))
        .unwrap();
        let text = job.describe();
        assert!(text.contains("- id: daily"));
        assert!(text.contains("- expr: */1 * * * *"));
        assert!(text.contains("- report_to_session: main"));
        assert!(text.contains("- silent: false"));
    }
}
