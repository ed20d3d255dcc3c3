// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named FIFO table guarded by a two-semaphore System V set.
//
// Semaphore 0 counts dishes on the table, semaphore 1 counts free places.
// The washer decrements "free" and increments "filled" in one atomic semop
// before writing a frame; the wiper does the mirror image before reading
// one. The FIFO itself provides ordering.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{Owned, PutEnd, Table, TableResources, TakeEnd, WasherEnd, WiperEnd};
use crate::config::{BackendKind, Capacity};
use crate::error::{Error, Result};
use crate::item::{read_frame, write_frame, Item};
use crate::platform::{posix, SemSet};
use crate::role::Role;
use crate::shm_name;

const FILLED: u16 = 0;
const FREE: u16 = 1;

/// Largest value a System V semaphore is guaranteed to hold (`SEMVMX`).
pub const MAX_CAPACITY: usize = 32767;

pub(crate) fn open(capacity: Capacity) -> Result<Table> {
    if capacity.get() > MAX_CAPACITY {
        return Err(Error::setup(
            "creating semaphore set",
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("table limit {capacity} exceeds semaphore maximum {MAX_CAPACITY}"),
            ),
        ));
    }

    let path = shm_name::fifo_path("dish_washing");
    posix::make_fifo(&path).map_err(|e| Error::setup("mkfifo", e))?;

    let sems = match SemSet::create(&[0, capacity.get() as u16]) {
        Ok(s) => s,
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            return Err(Error::setup("semget", e));
        }
    };
    debug!(path = %path.display(), sem_id = sems.id(), "fifo table ready");

    Ok(Table {
        resources: TableResources::new(
            BackendKind::Fifo,
            Owned::Fifo(FifoResources {
                path: path.clone(),
                sems,
            }),
        ),
        washer: WasherEnd::Fifo(FifoWasher {
            path: path.clone(),
            sems,
            fifo: None,
        }),
        wiper: WiperEnd::Fifo(FifoWiper {
            path,
            sems,
            fifo: None,
            took_last: false,
        }),
    })
}

pub(crate) struct FifoResources {
    path: PathBuf,
    sems: SemSet,
}

impl FifoResources {
    pub(crate) fn release(&self) -> Result<()> {
        let unlinked = std::fs::remove_file(&self.path).map_err(|e| Error::io("unlinking fifo", e));
        let removed = self.sems.remove().map_err(|e| Error::io("removing semaphore set", e));
        unlinked.and(removed)
    }
}

/// Open the FIFO without blocking so that a peer stuck in `open` wakes up.
fn poke(path: &Path, write: bool) {
    let res = OpenOptions::new()
        .read(!write)
        .write(write)
        .custom_flags(libc::O_NONBLOCK)
        .open(path);
    if let Err(e) = res {
        debug!(error = %e, "fifo poke failed");
    }
}

pub struct FifoWasher {
    path: PathBuf,
    sems: SemSet,
    fifo: Option<File>,
}

impl PutEnd for FifoWasher {
    /// Blocks until the wiper opens its side.
    fn before(&mut self) -> Result<()> {
        let f = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::io("opening fifo for writing", e))?;
        self.fifo = Some(f);
        Ok(())
    }

    fn put(&mut self, item: &Item) -> Result<()> {
        let fifo = self.fifo.as_mut().ok_or_else(not_open)?;
        self.sems
            .op(&[(FREE, -1), (FILLED, 1)])
            .map_err(|e| Error::sysv(Role::Washer, "waiting for a free place", e))?;
        write_frame(fifo, item).map_err(|e| Error::stream(Role::Washer, "writing dish", e))
    }

    fn after(&mut self) -> Result<()> {
        self.fifo = None;
        Ok(())
    }

    /// Close the write end before waking the wiper, so that its read hits
    /// EOF rather than waiting on a live writer.
    fn abort(&mut self) {
        if self.fifo.take().is_none() {
            poke(&self.path, true);
        }
        if let Err(e) = self.sems.op(&[(FILLED, 1)]) {
            warn!(error = %e, "fifo washer abort: semop failed");
        }
    }
}

pub struct FifoWiper {
    path: PathBuf,
    sems: SemSet,
    fifo: Option<File>,
    took_last: bool,
}

impl TakeEnd for FifoWiper {
    /// Blocks until the washer opens its side.
    fn before(&mut self) -> Result<()> {
        let f = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(|e| Error::io("opening fifo for reading", e))?;
        self.fifo = Some(f);
        Ok(())
    }

    fn take(&mut self) -> Result<Item> {
        let fifo = self.fifo.as_mut().ok_or_else(not_open)?;
        self.sems
            .op(&[(FILLED, -1), (FREE, 1)])
            .map_err(|e| Error::sysv(Role::Wiper, "waiting for a dish", e))?;
        let item = read_frame(fifo).map_err(|e| Error::stream(Role::Wiper, "reading dish", e))?;
        self.took_last = item.terminal;
        Ok(item)
    }

    fn is_done(&self) -> bool {
        self.took_last
    }

    fn after(&mut self) -> Result<()> {
        self.fifo = None;
        Ok(())
    }

    /// Close the read end before waking the washer: its next write must
    /// fail with EPIPE, or it would block on the following semop for good.
    fn abort(&mut self) {
        if self.fifo.take().is_none() {
            poke(&self.path, false);
        }
        if let Err(e) = self.sems.op(&[(FREE, 1)]) {
            warn!(error = %e, "fifo wiper abort: semop failed");
        }
    }
}

fn not_open() -> Error {
    Error::io("using fifo before opening it", io::Error::from(io::ErrorKind::NotConnected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn put_plates<E: PutEnd>(washer: &mut E, n: usize) -> Result<()> {
        washer.before()?;
        for i in 0..n {
            washer.put(&Item::new("plate", i + 1 == n).unwrap())?;
        }
        washer.after()
    }

    #[test]
    fn wiper_abort_fails_the_blocked_put() {
        let Table {
            mut resources,
            mut washer,
            mut wiper,
        } = open(Capacity::new(1).unwrap()).unwrap();

        let (tx, rx) = mpsc::channel();
        let producer = thread::spawn(move || {
            tx.send(put_plates(&mut washer, 3)).unwrap();
        });

        wiper.before().unwrap();
        // The first plate fills the table; the second put is now waiting.
        thread::sleep(Duration::from_millis(100));
        wiper.abort();

        let res = rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| panic!("washer still blocked after wiper abort"));
        assert!(
            matches!(res, Err(Error::PeerAborted { role: Role::Washer })),
            "{res:?}"
        );
        producer.join().unwrap();
        drop(wiper);
        resources.release().unwrap();
    }

    #[test]
    fn washer_abort_fails_the_blocked_take() {
        let Table {
            mut resources,
            mut washer,
            mut wiper,
        } = open(Capacity::new(2).unwrap()).unwrap();

        let consumer = thread::spawn(move || -> Result<Vec<Item>> {
            wiper.before()?;
            let mut got = Vec::new();
            loop {
                got.push(wiper.take()?);
            }
        });

        washer.before().unwrap();
        washer.put(&Item::new("plate", false).unwrap()).unwrap();
        thread::sleep(Duration::from_millis(100));
        washer.abort();

        let res = consumer.join().unwrap();
        assert!(
            matches!(res, Err(Error::PeerAborted { role: Role::Wiper })),
            "{res:?}"
        );
        drop(washer);
        resources.release().unwrap();
    }

    #[test]
    fn release_removes_path_and_semaphores() {
        let Table {
            mut resources,
            washer,
            wiper,
        } = open(Capacity::new(4).unwrap()).unwrap();
        let (path, sems) = match &resources.owned {
            Owned::Fifo(r) => (r.path.clone(), r.sems),
            _ => unreachable!(),
        };
        drop((washer, wiper));

        assert!(path.exists());
        assert_eq!(sems.value(FREE).unwrap(), 4);
        resources.release().unwrap();
        assert!(!path.exists());
        let err = sems.value(FREE).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
        resources.release().unwrap();
    }
}
