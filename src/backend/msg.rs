// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// System V message-queue table. One queue carries two kinds of message:
//
//   kind 1, free space: a coalesced count of free places. Setup posts a
//     single message of count C instead of C singletons; the washer takes
//     one place and reposts the remainder.
//   kind 2, dish: terminal flag and dish type.
//
// A negative free-space count or a dish with the abort flag is the peer's
// abort signal.

use std::io;

use tracing::{debug, warn};

use super::{Owned, PutEnd, Table, TableResources, TakeEnd, WasherEnd, WiperEnd};
use crate::config::{BackendKind, Capacity};
use crate::error::{Error, Result};
use crate::item::{Item, MAX_TYPE_LEN};
use crate::platform::posix::MsgRecord;
use crate::platform::MsgQueue;
use crate::role::Role;

const FREE_SPACE: libc::c_long = 1;
const DISH: libc::c_long = 2;

const FLAG_TERMINAL: u8 = 1;
const FLAG_ABORT: u8 = 2;

#[derive(Clone, Copy)]
#[repr(C)]
struct FreeSpaceMsg {
    mtype: libc::c_long,
    count: i32,
}

// Safety: repr(C), leading c_long, plain integers.
unsafe impl MsgRecord for FreeSpaceMsg {
    fn mtype(&self) -> libc::c_long {
        self.mtype
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
struct DishMsg {
    mtype: libc::c_long,
    flags: u8,
    len: u8,
    kind: [u8; MAX_TYPE_LEN],
}

// Safety: repr(C), leading c_long, plain bytes.
unsafe impl MsgRecord for DishMsg {
    fn mtype(&self) -> libc::c_long {
        self.mtype
    }
}

impl DishMsg {
    fn new(item: &Item) -> Self {
        let bytes = item.kind.as_bytes();
        let mut kind = [0u8; MAX_TYPE_LEN];
        kind[..bytes.len()].copy_from_slice(bytes);
        Self {
            mtype: DISH,
            flags: if item.terminal { FLAG_TERMINAL } else { 0 },
            len: bytes.len() as u8,
            kind,
        }
    }

    fn abort() -> Self {
        Self {
            mtype: DISH,
            flags: FLAG_ABORT,
            len: 0,
            kind: [0u8; MAX_TYPE_LEN],
        }
    }

    fn item(&self) -> io::Result<Item> {
        Item::from_wire(self.flags & FLAG_TERMINAL, &self.kind[..self.len as usize])
    }
}

pub(crate) fn open(capacity: Capacity) -> Result<Table> {
    let count = i32::try_from(capacity.get()).map_err(|_| {
        Error::setup(
            "posting free space",
            io::Error::new(io::ErrorKind::InvalidInput, "table limit exceeds i32"),
        )
    })?;
    let queue = MsgQueue::create().map_err(|e| Error::setup("msgget", e))?;
    if let Err(e) = queue.send(&FreeSpaceMsg {
        mtype: FREE_SPACE,
        count,
    }) {
        let _ = queue.remove();
        return Err(Error::setup("posting free space", e));
    }
    debug!(msg_id = queue.id(), capacity = count, "message table ready");

    Ok(Table {
        resources: TableResources::new(BackendKind::Msg, Owned::Msg(queue)),
        washer: WasherEnd::Msg(MsgWasher { queue }),
        wiper: WiperEnd::Msg(MsgWiper {
            queue,
            took_last: false,
        }),
    })
}

pub(crate) fn release(queue: &MsgQueue) -> Result<()> {
    queue
        .remove()
        .map_err(|e| Error::io("removing message queue", e))
}

pub struct MsgWasher {
    queue: MsgQueue,
}

impl PutEnd for MsgWasher {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn put(&mut self, item: &Item) -> Result<()> {
        let mut space: FreeSpaceMsg = self
            .queue
            .recv(FREE_SPACE)
            .map_err(|e| Error::sysv(Role::Washer, "waiting for free space", e))?;
        if space.count <= 0 {
            return Err(Error::PeerAborted { role: Role::Washer });
        }
        space.count -= 1;
        if space.count > 0 {
            self.queue
                .send(&space)
                .map_err(|e| Error::sysv(Role::Washer, "reposting free space", e))?;
        }
        self.queue
            .send(&DishMsg::new(item))
            .map_err(|e| Error::sysv(Role::Washer, "sending dish", e))
    }

    fn after(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) {
        if let Err(e) = self.queue.try_send(&DishMsg::abort()) {
            warn!(error = %e, "message washer abort: send failed");
        }
    }
}

pub struct MsgWiper {
    queue: MsgQueue,
    took_last: bool,
}

impl TakeEnd for MsgWiper {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn take(&mut self) -> Result<Item> {
        self.queue
            .send(&FreeSpaceMsg {
                mtype: FREE_SPACE,
                count: 1,
            })
            .map_err(|e| Error::sysv(Role::Wiper, "returning free space", e))?;
        let msg: DishMsg = self
            .queue
            .recv(DISH)
            .map_err(|e| Error::sysv(Role::Wiper, "waiting for a dish", e))?;
        if msg.flags & FLAG_ABORT != 0 {
            return Err(Error::PeerAborted { role: Role::Wiper });
        }
        let item = msg.item().map_err(|e| Error::Protocol(e.to_string()))?;
        self.took_last = item.terminal;
        Ok(item)
    }

    fn is_done(&self) -> bool {
        self.took_last
    }

    fn after(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) {
        let msg = FreeSpaceMsg {
            mtype: FREE_SPACE,
            count: -1,
        };
        if let Err(e) = self.queue.try_send(&msg) {
            warn!(error = %e, "message wiper abort: send failed");
        }
    }
}
