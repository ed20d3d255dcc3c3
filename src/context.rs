// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Execution context for the wiper: a thread in this process or a forked
// child. Each side keeps only its own end of the table; the other end is
// dropped right after the split so that stream backends see EOF/EPIPE when
// the peer goes away.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::backend::{WasherEnd, WiperEnd};
use crate::config::Isolation;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::platform::posix::{self, Fork};
use crate::role::Wiper;

/// Exit status of a forked wiper that returned an error.
pub const EXIT_FAILURE: i32 = 1;
/// Exit status of a forked wiper that panicked.
pub const EXIT_PANIC: i32 = 101;

/// A running wiper.
#[derive(Debug)]
pub enum WiperContext {
    Thread(JoinHandle<Result<Vec<Item>>>),
    Process(libc::pid_t),
}

/// Start `wiper` on `end` in a new context. Returns the washer end, which
/// the caller keeps, and a handle to join the wiper.
pub fn spawn(
    isolation: Isolation,
    wiper: Wiper,
    end: WiperEnd,
    washer_end: WasherEnd,
) -> Result<(WasherEnd, WiperContext)> {
    match isolation {
        Isolation::Thread => {
            let mut end = end;
            let handle = thread::Builder::new()
                .name("wiper".into())
                .spawn(move || wiper.work(&mut end))
                .map_err(|e| Error::setup("spawning wiper thread", e))?;
            debug!("wiper thread started");
            Ok((washer_end, WiperContext::Thread(handle)))
        }
        Isolation::Process => {
            // Safety: the child only runs the wiper loop on objects it owns
            // and leaves through exit_child.
            match unsafe { posix::fork() }.map_err(|e| Error::setup("fork", e))? {
                Fork::Child => {
                    drop(washer_end);
                    run_child(wiper, end)
                }
                Fork::Parent(pid) => {
                    drop(end);
                    debug!(pid, "wiper process started");
                    Ok((washer_end, WiperContext::Process(pid)))
                }
            }
        }
    }
}

fn run_child(wiper: Wiper, mut end: WiperEnd) -> ! {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| wiper.work(&mut end)));
    drop(end);
    let code = match outcome {
        Ok(Ok(_)) => 0,
        Ok(Err(e)) => {
            error!(error = %e, "wiper failed");
            EXIT_FAILURE
        }
        Err(_) => EXIT_PANIC,
    };
    posix::exit_child(code)
}

impl WiperContext {
    pub fn is_process(&self) -> bool {
        matches!(self, WiperContext::Process(_))
    }

    /// Block until the wiper finishes. A thread hands back the dishes it
    /// took; a process only reports success.
    pub fn join(self) -> Result<Option<Vec<Item>>> {
        match self {
            WiperContext::Thread(handle) => match handle.join() {
                Ok(res) => res.map(Some),
                Err(payload) => Err(Error::ConsumerFailed(format!(
                    "wiper thread panicked: {}",
                    panic_message(&*payload)
                ))),
            },
            WiperContext::Process(pid) => {
                let status = posix::wait_for_exit(pid)
                    .map_err(|e| Error::io("waiting for wiper process", e))?;
                debug!(pid, ?status, "wiper process exited");
                if status.success() {
                    Ok(None)
                } else if status.signaled {
                    Err(Error::ConsumerFailed(format!(
                        "wiper process {pid} killed by signal {}",
                        status.signal
                    )))
                } else {
                    Err(Error::ConsumerFailed(format!(
                        "wiper process {pid} exited with status {}",
                        status.exit_code
                    )))
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
