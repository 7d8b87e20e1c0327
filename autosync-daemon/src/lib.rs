//! Background autosync: folder watcher + debounced pipeline runs + control socket.

mod error;
pub mod protocol;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, serve, start_blocking, RunSummary};
pub use scheduler::DebounceScheduler;
