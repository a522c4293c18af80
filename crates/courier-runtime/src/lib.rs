//! Session runtime: the dispatcher that turns channel messages into wakes,
//! and the thread manager that executes them one at a time per session.

pub mod dispatcher;
pub mod threads;
pub mod wake;

pub use dispatcher::{DispatchConfig, Dispatcher};
pub use threads::ThreadManager;
pub use wake::{Sink, WakeMessage};
