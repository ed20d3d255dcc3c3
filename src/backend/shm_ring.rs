// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory table: a ring of C + 1 dish slots in a POSIX shm segment,
// guarded by two process-shared counting semaphores living in the same
// segment.
//
// Both sides post their own semaphore before waiting on the partner's:
//
//   put:  post(filled); wait(free);   write slot[head]; head += 1
//   take: post(free);   wait(filled); read slot[tail];  clear; tail += 1
//
// This order must not change. Because the wiper frees a place before it has
// emptied its slot, the washer can be one slot ahead of the table limit;
// the extra ring slot absorbs that. Because the washer announces a dish
// before writing it, each slot carries a published length and the wiper
// backs off until the slot it was promised is published.

use std::cell::UnsafeCell;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Owned, PutEnd, Table, TableResources, TakeEnd, WasherEnd, WiperEnd};
use crate::backoff;
use crate::config::{BackendKind, Capacity};
use crate::error::{Error, Result};
use crate::item::{Item, MAX_TYPE_LEN};
use crate::platform::posix;
use crate::role::Role;
use crate::shm::ShmHandle;
use crate::shm_name;

// ---------------------------------------------------------------------------
// Shared memory layout
// ---------------------------------------------------------------------------

#[repr(C)]
struct Header {
    /// Dishes announced by the washer.
    filled: UnsafeCell<libc::sem_t>,
    /// Places freed by the wiper (initially the table limit).
    free: UnsafeCell<libc::sem_t>,
    /// Next slot the washer writes.
    head: AtomicU32,
    /// Next slot the wiper reads.
    tail: AtomicU32,
    /// Set after the terminal dish's slot is published.
    terminal: AtomicBool,
    aborted: AtomicBool,
}

#[repr(C)]
struct Slot {
    /// 0 = empty; otherwise the byte length of `kind`, stored last.
    len: AtomicU32,
    terminal: AtomicU8,
    kind: UnsafeCell<[u8; MAX_TYPE_LEN]>,
}

const SLOTS_OFFSET: usize = {
    let h = std::mem::size_of::<Header>();
    let a = std::mem::align_of::<Slot>();
    (h + a - 1) / a * a
};

/// The mapped segment plus its geometry. Shared by both ends and by the
/// resource owner; the mapping goes away with the last reference.
pub struct ShmTable {
    shm: ShmHandle,
    slots: u32,
}

// Safety: every field of the segment is either atomic, a process-shared
// semaphore, or a slot body written only by the washer while the slot is
// unpublished and read only by the wiper after it is published.
unsafe impl Send for ShmTable {}
unsafe impl Sync for ShmTable {}

impl ShmTable {
    fn create(capacity: Capacity) -> Result<Self> {
        let slots = u32::try_from(capacity.get())
            .ok()
            .and_then(|c| c.checked_add(1))
            .ok_or_else(|| {
                Error::setup(
                    "sizing shared table",
                    io::Error::new(io::ErrorKind::InvalidInput, "table limit too large"),
                )
            })?;
        let size = SLOTS_OFFSET + std::mem::size_of::<Slot>() * slots as usize;
        let name = shm_name::unique_name("dish_table");
        let shm = ShmHandle::create(&name, size)
            .map_err(|e| Error::setup("creating shared memory", e))?;
        let table = Self { shm, slots };

        // The segment is zero-filled: indices, flags and slot lengths start
        // at zero. Only the semaphores need initialising.
        let hdr = table.header();
        let init = unsafe {
            posix::sem_init_shared(hdr.filled.get(), 0)
                .and_then(|_| posix::sem_init_shared(hdr.free.get(), capacity.get() as u32))
        };
        if let Err(e) = init {
            let _ = table.shm.unlink();
            return Err(Error::setup("sem_init", e));
        }
        debug!(name = table.shm.name(), slots, size, "shared table ready");
        Ok(table)
    }

    fn header(&self) -> &Header {
        unsafe { &*(self.shm.as_ptr() as *const Header) }
    }

    fn slot(&self, idx: u32) -> &Slot {
        debug_assert!(idx < self.slots);
        unsafe {
            let base = self.shm.as_ptr().add(SLOTS_OFFSET) as *const Slot;
            &*base.add(idx as usize)
        }
    }

    /// Ring length (table limit + 1).
    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn name(&self) -> &str {
        self.shm.name()
    }

    /// Current semaphore values as `(filled, free)`.
    #[cfg(test)]
    fn counts(&self) -> io::Result<(i32, i32)> {
        let hdr = self.header();
        unsafe {
            Ok((
                posix::sem_value(hdr.filled.get())?,
                posix::sem_value(hdr.free.get())?,
            ))
        }
    }

    fn post(&self, sem: &UnsafeCell<libc::sem_t>, role: Role, op: &'static str) -> Result<()> {
        unsafe { posix::sem_post(sem.get()) }.map_err(|e| Error::sysv(role, op, e))
    }

    fn wait(&self, sem: &UnsafeCell<libc::sem_t>, role: Role, op: &'static str) -> Result<()> {
        unsafe { posix::sem_wait(sem.get()) }.map_err(|e| Error::sysv(role, op, e))
    }

    fn put(&self, item: &Item) -> Result<()> {
        let hdr = self.header();
        self.post(&hdr.filled, Role::Washer, "announcing a dish")?;
        self.wait(&hdr.free, Role::Washer, "waiting for a free place")?;
        if hdr.aborted.load(Ordering::Acquire) {
            return Err(Error::PeerAborted { role: Role::Washer });
        }

        let head = hdr.head.load(Ordering::Relaxed);
        let slot = self.slot(head);
        if slot.len.load(Ordering::Acquire) != 0 {
            return Err(Error::Protocol(format!("ring overrun at slot {head}")));
        }
        let bytes = item.kind.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_TYPE_LEN {
            return Err(Error::Protocol(format!(
                "dish type of {} bytes does not fit a slot",
                bytes.len()
            )));
        }
        // Safety: the slot is unpublished (len == 0), so only this side
        // touches its body until the Release store below.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), slot.kind.get().cast::<u8>(), bytes.len())
        };
        slot.terminal.store(item.terminal as u8, Ordering::Relaxed);
        slot.len.store(bytes.len() as u32, Ordering::Release);
        hdr.head.store((head + 1) % self.slots, Ordering::Relaxed);

        if item.terminal {
            hdr.terminal.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn take(&self) -> Result<Item> {
        let hdr = self.header();
        self.post(&hdr.free, Role::Wiper, "freeing a place")?;
        self.wait(&hdr.filled, Role::Wiper, "waiting for a dish")?;

        let tail = hdr.tail.load(Ordering::Relaxed);
        let slot = self.slot(tail);
        let len = backoff::spin_until(
            || match slot.len.load(Ordering::Acquire) {
                0 => None,
                n => Some(n as usize),
            },
            || hdr.aborted.load(Ordering::Acquire),
        )
        .ok_or(Error::PeerAborted { role: Role::Wiper })?;
        if len > MAX_TYPE_LEN {
            return Err(Error::Protocol(format!("slot {tail} claims {len} bytes")));
        }

        let mut bytes = [0u8; MAX_TYPE_LEN];
        unsafe {
            ptr::copy_nonoverlapping(
                slot.kind.get().cast::<u8>().cast_const(),
                bytes.as_mut_ptr(),
                len,
            )
        };
        let terminal = slot.terminal.load(Ordering::Relaxed);
        slot.len.store(0, Ordering::Release);
        hdr.tail.store((tail + 1) % self.slots, Ordering::Relaxed);

        Item::from_wire(terminal, &bytes[..len]).map_err(|e| Error::Protocol(e.to_string()))
    }

    /// The terminal dish has been published and the wiper's next slot is
    /// empty.
    fn all_taken(&self) -> bool {
        let hdr = self.header();
        hdr.terminal.load(Ordering::Acquire)
            && self.slot(hdr.tail.load(Ordering::Relaxed)).len.load(Ordering::Acquire) == 0
    }

    /// Flag the table as aborted and wake whichever side is blocked.
    fn abort(&self) {
        let hdr = self.header();
        hdr.aborted.store(true, Ordering::Release);
        for sem in [&hdr.filled, &hdr.free] {
            if let Err(e) = unsafe { posix::sem_post(sem.get()) } {
                warn!(error = %e, "shared table abort: sem_post failed");
            }
        }
    }

    /// Destroy the semaphores and unlink the segment name.
    pub(crate) fn release(&self) -> Result<()> {
        let hdr = self.header();
        let destroyed = unsafe {
            posix::sem_destroy(hdr.filled.get()).and_then(|_| posix::sem_destroy(hdr.free.get()))
        }
        .map_err(|e| Error::io("destroying shared semaphores", e));
        let unlinked = self
            .shm
            .unlink()
            .map_err(|e| Error::io("unlinking shared memory", e));
        destroyed.and(unlinked)
    }
}

pub(crate) fn open(capacity: Capacity) -> Result<Table> {
    let table = Arc::new(ShmTable::create(capacity)?);
    Ok(Table {
        resources: TableResources::new(BackendKind::Shm, Owned::Shm(Arc::clone(&table))),
        washer: WasherEnd::Shm(ShmWasher {
            table: Arc::clone(&table),
        }),
        wiper: WiperEnd::Shm(ShmWiper {
            table,
            took_last: false,
        }),
    })
}

// ---------------------------------------------------------------------------
// Ends
// ---------------------------------------------------------------------------

pub struct ShmWasher {
    table: Arc<ShmTable>,
}

impl PutEnd for ShmWasher {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn put(&mut self, item: &Item) -> Result<()> {
        self.table.put(item)
    }

    fn after(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) {
        self.table.abort()
    }
}

pub struct ShmWiper {
    table: Arc<ShmTable>,
    took_last: bool,
}

impl TakeEnd for ShmWiper {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn take(&mut self) -> Result<Item> {
        let item = self.table.take()?;
        self.took_last = item.terminal;
        Ok(item)
    }

    fn is_done(&self) -> bool {
        self.took_last || self.table.all_taken()
    }

    fn after(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) {
        self.table.abort()
    }
}
