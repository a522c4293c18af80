//! Core scheduler: in-memory timer set over the durable store, driven by a
//! 1-second tick with a minutely store reload.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cron::CronExpr;
use crate::error::Result;
use crate::store::JobStore;
use crate::types::{Job, JobKind};

/// Invoked for every fire with a clone of the job, outside the scheduler
/// mutex — mutations to the live set never affect an in-flight callback.
pub type FireCallback = Arc<dyn Fn(Job) + Send + Sync>;

/// How often the store file is reparsed for out-of-band edits.
const RELOAD_SECS: u64 = 60;

struct Entry {
    job: Job,
    /// Parsed expression, cached so ticks don't reparse. `None` for `at`.
    cron: Option<CronExpr>,
    /// Next fire instant. `None` while the job is disabled.
    next_run: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(job: Job, now: DateTime<Utc>) -> Result<Self> {
        let cron = match job.kind {
            // Validation guarantees expr is present and parseable.
            JobKind::Cron => Some(CronExpr::parse(job.expr.as_deref().unwrap_or_default())?),
            JobKind::At => None,
        };
        let next_run = if job.enabled {
            match job.kind {
                JobKind::Cron => cron.as_ref().map(|c| c.next_after(now)),
                JobKind::At => job.at_time,
            }
        } else {
            None
        };
        Ok(Self {
            job,
            cron,
            next_run,
        })
    }
}

pub struct Scheduler {
    store: JobStore,
    entries: Mutex<HashMap<String, Entry>>,
    on_fire: FireCallback,
}

impl Scheduler {
    pub fn new(store: JobStore, on_fire: FireCallback) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
            on_fire,
        }
    }

    /// Parse the store and install the resulting timer set.
    ///
    /// Enabled `at` jobs whose instant already passed are pruned and the
    /// store rewritten without them. The new set is built completely before
    /// the old one is replaced, so a parse failure leaves the live set
    /// untouched. Returns the number of registered jobs.
    pub fn load(&self) -> Result<usize> {
        let jobs = self.store.load()?;
        let now = Utc::now();

        let mut next_set = HashMap::new();
        let mut pruned = 0usize;
        for job in jobs {
            let expired = job.kind == JobKind::At
                && job.enabled
                && job.at_time.map(|t| t <= now).unwrap_or(false);
            if expired {
                info!(job_id = %job.id, "pruning expired one-shot job");
                pruned += 1;
                continue;
            }
            next_set.insert(job.id.clone(), Entry::new(job, now)?);
        }

        let count = next_set.len();
        *self.entries.lock().unwrap() = next_set;
        if pruned > 0 {
            self.rewrite()?;
        }
        debug!(jobs = count, pruned, "job store loaded");
        Ok(count)
    }

    /// Reparse the store, keeping the live set on failure.
    pub fn reload(&self) {
        if let Err(e) = self.load() {
            error!(error = %e, "store reload failed, keeping previous job set");
        }
    }

    /// Validate and insert or replace a job, then persist and re-register
    /// its timer.
    pub fn upsert(&self, job: Job) -> Result<()> {
        job.validate()?;
        let entry = Entry::new(job.clone(), Utc::now())?;
        self.entries.lock().unwrap().insert(job.id.clone(), entry);
        self.rewrite()?;
        info!(job_id = %job.id, kind = %job.kind, "job upserted");
        Ok(())
    }

    /// Unregister the given jobs and rewrite the store. Returns how many
    /// of the ids actually existed.
    pub fn remove(&self, ids: &[String]) -> Result<usize> {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            ids.iter().filter(|id| entries.remove(*id).is_some()).count()
        };
        if removed > 0 {
            self.rewrite()?;
            info!(removed, "jobs removed");
        }
        Ok(removed)
    }

    /// All known jobs, sorted by id.
    pub fn list(&self) -> Vec<Job> {
        let entries = self.entries.lock().unwrap();
        let mut jobs: Vec<Job> = entries.values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Main event loop. Ticks every second, reloads the store every minute,
    /// exits when `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");

        let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
        let mut reload = tokio::time::interval(std::time::Duration::from_secs(RELOAD_SECS));
        reload.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // An interval's first tick completes immediately; the caller just
        // loaded, so swallow it.
        reload.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.tick(),
                _ = reload.tick() => self.reload(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fire every job whose next run has arrived. Callbacks run after the
    /// mutex is released, with job clones.
    fn tick(&self) {
        let now = Utc::now();
        let mut fired: Vec<Job> = Vec::new();
        let mut store_dirty = false;

        {
            let mut entries = self.entries.lock().unwrap();
            let due: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.next_run.map(|t| t <= now).unwrap_or(false))
                .map(|(id, _)| id.clone())
                .collect();

            for id in due {
                let one_shot = {
                    let Some(entry) = entries.get_mut(&id) else {
                        continue;
                    };
                    fired.push(entry.job.clone());
                    match entry.job.kind {
                        JobKind::Cron => {
                            entry.next_run = entry.cron.as_ref().map(|c| c.next_after(now));
                            false
                        }
                        JobKind::At => true,
                    }
                };
                if one_shot {
                    // One-shot: gone from the map and, below, the store.
                    entries.remove(&id);
                    store_dirty = true;
                }
            }
        }

        for job in fired {
            info!(job_id = %job.id, kind = %job.kind, "job fired");
            (self.on_fire)(job);
        }

        if store_dirty {
            if let Err(e) = self.rewrite() {
                error!(error = %e, "store rewrite after one-shot fire failed");
            }
        }
    }

    fn rewrite(&self) -> Result<()> {
        let jobs = {
            let entries = self.entries.lock().unwrap();
            entries.values().map(|e| e.job.clone()).collect::<Vec<_>>()
        };
        self.store.write(&jobs)
    }
}
