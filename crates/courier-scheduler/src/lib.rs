//! `courier-scheduler` — durable job scheduler surfaced as a channel.
//!
//! # Overview
//!
//! Jobs are persisted to a workspace-local file (newline-delimited JSON or
//! a YAML array — both round-trip). The [`engine::Scheduler`] ticks once a
//! second and fires any job whose next run has arrived; fired jobs reach
//! the rest of the system as inbound [`Message`](courier_channels::Message)s
//! through the [`channel::CronChannel`].
//!
//! # Schedule kinds
//!
//! | Kind   | Behaviour                                              |
//! |--------|--------------------------------------------------------|
//! | `cron` | 5-field cron expression (`*`, `*/n`, `a-b`, lists)     |
//! | `at`   | Single fire at an absolute UTC instant, then removed   |

pub mod channel;
pub mod cron;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

pub use channel::CronChannel;
pub use cron::CronExpr;
pub use engine::{FireCallback, Scheduler};
pub use error::{Result, SchedulerError};
pub use store::JobStore;
pub use types::{Job, JobKind};
