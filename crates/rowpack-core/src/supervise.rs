//! Supervisory boundary for unexpected runtime faults.
//!
//! Resource cleanup in this crate is RAII-driven, so a panic inside an
//! operation already releases files and readers on unwind. What this module
//! adds is the reporting and restart policy around that: [`run_supervised`]
//! catches the panic at a single boundary, logs it with the caller's
//! location and a backtrace, optionally schedules a caller-supplied restart
//! action on a detached thread, and reports the absence of a result to the
//! caller. The faulting operation never silently succeeds; callers must
//! treat `None` as failure.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe, Location};
use std::thread;

use log::{error, info};

/// A restart action scheduled after a fault, run on a detached thread.
pub type RestartFn = Box<dyn FnOnce() + Send + 'static>;

/// Run `op`, containing any panic it raises.
///
/// On success the operation's result is returned. On a panic the fault is
/// logged with the supervised call site and a captured backtrace, the
/// optional `restart` action is spawned on a detached thread, and `None` is
/// returned.
#[track_caller]
pub fn run_supervised<R>(
    label: &str,
    restart: Option<RestartFn>,
    op: impl FnOnce() -> R,
) -> Option<R> {
    let caller = Location::caller();

    match panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(result) => Some(result),
        Err(payload) => {
            error!(
                "recovered from panic in {label} at {}:{}: {}",
                caller.file(),
                caller.line(),
                panic_message(payload.as_ref()),
            );
            error!("backtrace:\n{}", Backtrace::force_capture());

            if let Some(restart) = restart {
                info!("scheduling restart for {label}");
                thread::spawn(restart);
            }

            None
        }
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
