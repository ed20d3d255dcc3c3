// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A washer and a wiper share a table of fixed size. The washer puts washed
// dishes on it, the wiper takes them off, and the table is any of five
// interprocess transports: a named FIFO with System V semaphores, two
// anonymous pipes, a System V message queue, a shared-memory ring with
// process-shared semaphores, or two Unix socket pairs.

pub mod shm_name;

mod platform;

mod shm;

mod backoff;

pub mod error;
pub use error::{ConfigError, Error, Result};

pub mod config;
pub use config::{
    BackendKind, Capacity, DurationTable, Isolation, RunConfig, TaskQueue, WashTask,
};

pub mod item;
pub use item::Item;

pub mod backend;
pub use backend::{PutEnd, Table, TableResources, TakeEnd, WasherEnd, WiperEnd};

pub mod role;
pub use role::{Role, Stopwatch, Washer, Wiper};

pub mod context;
pub use context::WiperContext;

pub mod kitchen;
pub use kitchen::{Kitchen, Report};
