// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

#[cfg(unix)]
pub use posix::{MsgQueue, PlatformShm, SemSet};

#[cfg(not(unix))]
compile_error!("dishrack needs System V IPC and POSIX shared memory");
