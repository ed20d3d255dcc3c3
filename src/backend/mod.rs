// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The table: a bounded FIFO of dishes between one washer and one wiper,
// available over five interchangeable IPC substrates.
//
// `Table::open` creates the kernel objects and splits them into three
// owners:
//
//   - `WasherEnd`: the producer's capability (`before`/`put`/`after`);
//   - `WiperEnd`: the consumer's capability (`before`/`take`/`is_done`/`after`);
//   - `TableResources`: everything that must be removed from the system
//     once both roles are finished. Held by the orchestrator, released once.

use std::fmt;

use tracing::{debug, warn};

use crate::config::{BackendKind, Capacity};
use crate::error::Result;
use crate::item::Item;

pub mod fifo;
pub mod msg;
pub mod pipe;
pub mod shm_ring;
pub mod socket;
mod stream;

// ---------------------------------------------------------------------------
// Capability interfaces
// ---------------------------------------------------------------------------

/// The washer's side of the table.
pub trait PutEnd {
    /// Prepare the end for use (open streams). Runs in the washer's context.
    fn before(&mut self) -> Result<()>;

    /// Put one dish on the table, blocking while the table is full.
    fn put(&mut self, item: &Item) -> Result<()>;

    fn after(&mut self) -> Result<()>;

    /// Best-effort wake-up of the wiper after a fatal error on this side.
    /// Never fails; the wiper observes `PeerAborted`.
    fn abort(&mut self);
}

/// The wiper's side of the table.
pub trait TakeEnd {
    fn before(&mut self) -> Result<()>;

    /// Take the next dish, blocking while the table is empty.
    fn take(&mut self) -> Result<Item>;

    /// True once the terminal dish has been taken.
    fn is_done(&self) -> bool;

    fn after(&mut self) -> Result<()>;

    /// Best-effort wake-up of the washer after a fatal error on this side.
    fn abort(&mut self);
}

// ---------------------------------------------------------------------------
// Tagged ends
// ---------------------------------------------------------------------------

pub enum WasherEnd {
    Fifo(fifo::FifoWasher),
    Pipe(pipe::PipeWasher),
    Msg(msg::MsgWasher),
    Shm(shm_ring::ShmWasher),
    Socket(socket::SocketWasher),
}

pub enum WiperEnd {
    Fifo(fifo::FifoWiper),
    Pipe(pipe::PipeWiper),
    Msg(msg::MsgWiper),
    Shm(shm_ring::ShmWiper),
    Socket(socket::SocketWiper),
}

macro_rules! each_end {
    ($enum:ident, $self:expr, $end:ident => $body:expr) => {
        match $self {
            $enum::Fifo($end) => $body,
            $enum::Pipe($end) => $body,
            $enum::Msg($end) => $body,
            $enum::Shm($end) => $body,
            $enum::Socket($end) => $body,
        }
    };
}

impl WasherEnd {
    pub fn kind(&self) -> BackendKind {
        match self {
            WasherEnd::Fifo(_) => BackendKind::Fifo,
            WasherEnd::Pipe(_) => BackendKind::Pipe,
            WasherEnd::Msg(_) => BackendKind::Msg,
            WasherEnd::Shm(_) => BackendKind::Shm,
            WasherEnd::Socket(_) => BackendKind::Socket,
        }
    }
}

impl PutEnd for WasherEnd {
    fn before(&mut self) -> Result<()> {
        each_end!(WasherEnd, self, e => e.before())
    }

    fn put(&mut self, item: &Item) -> Result<()> {
        each_end!(WasherEnd, self, e => e.put(item))
    }

    fn after(&mut self) -> Result<()> {
        each_end!(WasherEnd, self, e => e.after())
    }

    fn abort(&mut self) {
        each_end!(WasherEnd, self, e => e.abort())
    }
}

impl TakeEnd for WiperEnd {
    fn before(&mut self) -> Result<()> {
        each_end!(WiperEnd, self, e => e.before())
    }

    fn take(&mut self) -> Result<Item> {
        each_end!(WiperEnd, self, e => e.take())
    }

    fn is_done(&self) -> bool {
        each_end!(WiperEnd, self, e => e.is_done())
    }

    fn after(&mut self) -> Result<()> {
        each_end!(WiperEnd, self, e => e.after())
    }

    fn abort(&mut self) {
        each_end!(WiperEnd, self, e => e.abort())
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

pub(crate) enum Owned {
    Fifo(fifo::FifoResources),
    /// Pipes and sockets: every descriptor is owned by one of the ends.
    Streams,
    Msg(crate::platform::MsgQueue),
    Shm(std::sync::Arc<shm_ring::ShmTable>),
}

/// System objects shared by both ends. Released exactly once, after both
/// roles have finished; further calls are no-ops.
pub struct TableResources {
    kind: BackendKind,
    owned: Owned,
    released: bool,
}

impl TableResources {
    pub(crate) fn new(kind: BackendKind, owned: Owned) -> Self {
        Self {
            kind,
            owned,
            released: false,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Remove the table's kernel objects. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!(backend = %self.kind, "releasing table resources");
        match &self.owned {
            Owned::Fifo(r) => r.release(),
            Owned::Streams => Ok(()),
            Owned::Msg(q) => msg::release(q),
            Owned::Shm(t) => t.release(),
        }
    }
}

impl Drop for TableResources {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(backend = %self.kind, error = %e, "failed to release table resources");
        }
    }
}

impl fmt::Debug for TableResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableResources")
            .field("kind", &self.kind)
            .field("released", &self.released)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A freshly created table, split into its three owners.
pub struct Table {
    pub resources: TableResources,
    pub washer: WasherEnd,
    pub wiper: WiperEnd,
}

impl Table {
    /// Create the kernel objects for `kind` with room for `capacity` dishes.
    /// Fails with `Error::Setup` before either role starts.
    pub fn open(kind: BackendKind, capacity: Capacity) -> Result<Self> {
        debug!(backend = %kind, capacity = capacity.get(), "opening table");
        match kind {
            BackendKind::Fifo => fifo::open(capacity),
            BackendKind::Pipe => pipe::open(capacity),
            BackendKind::Msg => msg::open(capacity),
            BackendKind::Shm => shm_ring::open(capacity),
            BackendKind::Socket => socket::open(capacity),
        }
    }
}
