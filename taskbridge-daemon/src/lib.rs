//! Daemon runtime: event ingest socket + board poll driver + reconcile
//! processor, with a newline-delimited JSON control protocol.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    push_event, request_poll, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, start_blocking, RuntimeStats};
