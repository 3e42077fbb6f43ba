//! The supervisor (C7): safely stops a running scheduler process by
//! identity-verified PID signaling, escalating from a graceful to a forced
//! signal, and taking over `final.json` synthesis if the scheduler itself
//! never terminalized.

pub mod error;
pub mod process_info;
pub mod stop;

pub use error::{Result, SupervisorError};
pub use process_info::{FakeProcess, FakeProcessInfo, ProcessInfo, ProcfsProcessInfo, PsProcessInfo};
pub use stop::{stop, StopReport};

/// Picks the real-world [`ProcessInfo`] backend for this platform: `/proc`
/// on Linux, `ps` elsewhere.
pub fn default_process_info() -> Box<dyn ProcessInfo> {
    if std::path::Path::new("/proc").is_dir() {
        Box::new(ProcfsProcessInfo)
    } else {
        Box::new(PsProcessInfo)
    }
}
