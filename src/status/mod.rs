//! Status publication: pipeline state, coded errors and display values

mod reporter;

pub use reporter::{Activity, ActivityGuard, Busy, StatusReporter, STATUS_ONLINE};
