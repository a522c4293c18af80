//! `courier cron …` — job store mutations from the command line.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;

use courier_core::CourierConfig;
use courier_scheduler::{FireCallback, Job, JobKind, JobStore, Scheduler};

#[derive(Subcommand)]
pub enum CronCommand {
    /// Add or replace a recurring job.
    SetCron {
        #[arg(long)]
        id: String,
        /// 5-field cron expression, e.g. "*/15 9-17 * * 1-5".
        #[arg(long)]
        expr: String,
        #[arg(long)]
        task: String,
        /// Agent template to run the task with.
        #[arg(long)]
        agent: Option<String>,
        /// Session that receives the result (default: main).
        #[arg(long)]
        report_to: Option<String>,
        /// Discard the result instead of reporting it.
        #[arg(long)]
        silent: bool,
    },

    /// Add or replace a one-shot job.
    SetAt {
        #[arg(long)]
        id: String,
        /// Absolute UTC instant, RFC 3339 (e.g. 2026-09-01T07:30:00Z).
        #[arg(long)]
        at: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        report_to: Option<String>,
        #[arg(long)]
        silent: bool,
    },

    /// List all jobs.
    List,

    /// Remove jobs by id.
    Remove { ids: Vec<String> },
}

pub fn run(config: CourierConfig, command: CronCommand) -> anyhow::Result<()> {
    let store = JobStore::new(config.workspace.cron_store_path());
    let on_fire: FireCallback = Arc::new(|_| {});
    let scheduler = Scheduler::new(store, on_fire);
    scheduler.load().context("job store load failed")?;

    match command {
        CronCommand::SetCron {
            id,
            expr,
            task,
            agent,
            report_to,
            silent,
        } => {
            let job = build_job(
                id.clone(),
                JobKind::Cron,
                Some(expr),
                None,
                task,
                agent,
                report_to,
                silent,
            );
            scheduler.upsert(job)?;
            println!("cron job '{id}' saved");
        }

        CronCommand::SetAt {
            id,
            at,
            task,
            agent,
            report_to,
            silent,
        } => {
            let at_time: DateTime<Utc> = at
                .parse()
                .with_context(|| format!("'{at}' is not an RFC 3339 timestamp"))?;
            let job = build_job(
                id.clone(),
                JobKind::At,
                None,
                Some(at_time),
                task,
                agent,
                report_to,
                silent,
            );
            scheduler.upsert(job)?;
            println!("one-shot job '{id}' saved");
        }

        CronCommand::List => {
            let jobs = scheduler.list();
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in jobs {
                println!("{}", format_job(&job));
            }
        }

        CronCommand::Remove { ids } => {
            let removed = scheduler.remove(&ids)?;
            println!("removed {removed} of {} job(s)", ids.len());
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_job(
    id: String,
    kind: JobKind,
    expr: Option<String>,
    at_time: Option<DateTime<Utc>>,
    task: String,
    agent: Option<String>,
    report_to: Option<String>,
    silent: bool,
) -> Job {
    let report_to_session = if silent {
        report_to
    } else {
        Some(report_to.unwrap_or_else(|| "main".to_string()))
    };
    Job {
        id,
        kind,
        expr,
        at_time,
        task,
        agent,
        report_to_session,
        silent,
        enabled: true,
        created_at: Utc::now(),
    }
}

fn format_job(job: &Job) -> String {
    let when = match job.kind {
        JobKind::Cron => job.expr.clone().unwrap_or_default(),
        JobKind::At => job
            .at_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    };
    format!(
        "{:<20} {:<5} {:<24} enabled={} silent={} task={}",
        job.id, job.kind, when, job.enabled, job.silent, job.task
    )
}
