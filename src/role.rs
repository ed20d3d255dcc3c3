// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The two roles around the table. The washer walks the task queue, spends
// each dish's washing time, then puts it on the table; the wiper takes
// dishes until it sees the terminal one, spending each dish's wiping time.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::backend::{PutEnd, TakeEnd};
use crate::config::{DurationTable, TaskQueue};
use crate::error::{ConfigError, Error, Result};
use crate::item::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Washer,
    Wiper,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Washer => "WASHER",
            Role::Wiper => "WIPER",
        })
    }
}

/// Wall clock shared by both roles of one run. `Copy`, so a forked wiper
/// keeps counting from the same start.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed whole seconds, rounding up from 900 ms.
    pub fn secs(&self) -> u64 {
        secs_from_millis(self.start.elapsed().as_millis() as u64)
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::start()
    }
}

fn secs_from_millis(ms: u64) -> u64 {
    (ms + 100) / 1000
}

fn lookup(times: &DurationTable, table: &'static str, kind: &str) -> Result<Duration> {
    times.get(kind).ok_or_else(|| {
        Error::Config(ConfigError::UnknownType {
            table,
            kind: kind.to_owned(),
        })
    })
}

// ---------------------------------------------------------------------------
// Washer
// ---------------------------------------------------------------------------

/// The producer.
#[derive(Debug, Clone)]
pub struct Washer {
    times: DurationTable,
    clock: Stopwatch,
}

impl Washer {
    pub fn new(times: DurationTable, clock: Stopwatch) -> Self {
        Self { times, clock }
    }

    /// Wash and put every dish of `tasks`, in order. The last unit of the
    /// last non-empty task is marked terminal. Returns the number of dishes
    /// put.
    ///
    /// On failure the end is aborted before the error is returned, so the
    /// wiper does not wait forever.
    pub fn work<E: PutEnd + ?Sized>(&self, end: &mut E, tasks: &TaskQueue) -> Result<u64> {
        match self.run(end, tasks) {
            Ok(n) => Ok(n),
            Err(e) => {
                warn!(role = %Role::Washer, elapsed = self.clock.secs(), error = %e, "aborting");
                end.abort();
                Err(e)
            }
        }
    }

    fn run<E: PutEnd + ?Sized>(&self, end: &mut E, tasks: &TaskQueue) -> Result<u64> {
        end.before()?;
        let last = tasks.last_nonempty();
        let mut washed = 0u64;

        for (idx, task) in tasks.iter().enumerate() {
            // Empty tasks need no washing time.
            if task.count == 0 {
                continue;
            }
            let time = lookup(&self.times, "washing", &task.kind)?;
            for unit in 0..task.count {
                let terminal = Some(idx) == last && unit + 1 == task.count;
                let item = Item::new(task.kind.as_str(), terminal)
                    .map_err(|e| Error::Protocol(e.to_string()))?;

                info!(
                    role = %Role::Washer,
                    elapsed = self.clock.secs(),
                    "Wash {} for {} seconds",
                    item.kind,
                    time.as_secs()
                );
                thread::sleep(time);

                info!(
                    role = %Role::Washer,
                    elapsed = self.clock.secs(),
                    "Trying to put {} on the table",
                    item.kind
                );
                end.put(&item)?;
                info!(
                    role = %Role::Washer,
                    elapsed = self.clock.secs(),
                    "Put {} on the table",
                    item.kind
                );
                washed += 1;
            }
        }

        end.after()?;
        info!(role = %Role::Washer, elapsed = self.clock.secs(), "Finished work");
        Ok(washed)
    }
}

// ---------------------------------------------------------------------------
// Wiper
// ---------------------------------------------------------------------------

/// The consumer.
#[derive(Debug, Clone)]
pub struct Wiper {
    times: DurationTable,
    clock: Stopwatch,
}

impl Wiper {
    pub fn new(times: DurationTable, clock: Stopwatch) -> Self {
        Self { times, clock }
    }

    /// Take and wipe dishes until the terminal one has been taken. Returns
    /// the dishes in the order they were taken.
    pub fn work<E: TakeEnd + ?Sized>(&self, end: &mut E) -> Result<Vec<Item>> {
        let mut taken = Vec::new();
        match self.run(end, &mut taken) {
            Ok(()) => Ok(taken),
            Err(e) => {
                warn!(
                    role = %Role::Wiper,
                    elapsed = self.clock.secs(),
                    error = %e,
                    taken = taken.len(),
                    "aborting"
                );
                end.abort();
                Err(e)
            }
        }
    }

    fn run<E: TakeEnd + ?Sized>(&self, end: &mut E, taken: &mut Vec<Item>) -> Result<()> {
        end.before()?;

        while !end.is_done() {
            info!(
                role = %Role::Wiper,
                elapsed = self.clock.secs(),
                "Trying to get dish from the table"
            );
            let item = end.take()?;
            info!(
                role = %Role::Wiper,
                elapsed = self.clock.secs(),
                "Got {} from the table",
                item.kind
            );

            let time = lookup(&self.times, "wiping", &item.kind)?;
            info!(
                role = %Role::Wiper,
                elapsed = self.clock.secs(),
                "Wipe {} for {} seconds",
                item.kind,
                time.as_secs()
            );
            thread::sleep(time);
            taken.push(item);
        }

        end.after()?;
        info!(role = %Role::Wiper, elapsed = self.clock.secs(), "Finished work");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn role_names() {
        assert_eq!(Role::Washer.to_string(), "WASHER");
        assert_eq!(Role::Wiper.to_string(), "WIPER");
    }

    #[test]
    fn elapsed_rounds_up_from_nine_tenths() {
        assert_eq!(secs_from_millis(0), 0);
        assert_eq!(secs_from_millis(899), 0);
        assert_eq!(secs_from_millis(900), 1);
        assert_eq!(secs_from_millis(1899), 1);
        assert_eq!(secs_from_millis(1900), 2);
    }

    #[derive(Default)]
    struct Recorder {
        puts: Vec<Item>,
        befores: usize,
        afters: usize,
        aborted: bool,
        fail_at: Option<usize>,
    }

    impl PutEnd for Recorder {
        fn before(&mut self) -> Result<()> {
            self.befores += 1;
            Ok(())
        }
        fn put(&mut self, item: &Item) -> Result<()> {
            if self.fail_at == Some(self.puts.len()) {
                return Err(Error::Protocol("boom".into()));
            }
            self.puts.push(item.clone());
            Ok(())
        }
        fn after(&mut self) -> Result<()> {
            self.afters += 1;
            Ok(())
        }
        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    struct Script {
        items: VecDeque<Item>,
        last: bool,
        aborted: bool,
    }

    impl TakeEnd for Script {
        fn before(&mut self) -> Result<()> {
            Ok(())
        }
        fn take(&mut self) -> Result<Item> {
            let item = self
                .items
                .pop_front()
                .ok_or(Error::PeerAborted { role: Role::Wiper })?;
            self.last = item.terminal;
            Ok(item)
        }
        fn is_done(&self) -> bool {
            self.last
        }
        fn after(&mut self) -> Result<()> {
            Ok(())
        }
        fn abort(&mut self) {
            self.aborted = true;
        }
    }

    fn zero_times() -> DurationTable {
        [("plate", 0), ("cup", 0)].into_iter().collect()
    }

    #[test]
    fn washer_marks_last_nonempty_unit_terminal() {
        let tasks: TaskQueue = "plate: 2\ncup: 1\nplate: 0".parse().unwrap();
        let washer = Washer::new(zero_times(), Stopwatch::start());
        let mut end = Recorder::default();
        assert_eq!(washer.work(&mut end, &tasks).unwrap(), 3);

        let kinds: Vec<_> = end.puts.iter().map(|i| i.kind.as_str()).collect();
        assert_eq!(kinds, ["plate", "plate", "cup"]);
        let terminals: Vec<_> = end.puts.iter().map(|i| i.terminal).collect();
        assert_eq!(terminals, [false, false, true]);
        assert_eq!((end.befores, end.afters), (1, 1));
        assert!(!end.aborted);
    }

    #[test]
    fn washer_aborts_on_failure() {
        let tasks: TaskQueue = "plate: 3".parse().unwrap();
        let washer = Washer::new(zero_times(), Stopwatch::start());
        let mut end = Recorder {
            fail_at: Some(1),
            ..Default::default()
        };
        assert!(matches!(washer.work(&mut end, &tasks), Err(Error::Protocol(_))));
        assert!(end.aborted);
        assert_eq!(end.afters, 0);
    }

    #[test]
    fn washer_rejects_unknown_type() {
        let tasks: TaskQueue = "spoon: 1".parse().unwrap();
        let washer = Washer::new(zero_times(), Stopwatch::start());
        let mut end = Recorder::default();
        let err = washer.work(&mut end, &tasks).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownType { table: "washing", .. })
        ));
        assert!(end.aborted);
    }

    #[test]
    fn washer_skips_empty_task_without_a_time() {
        let tasks: TaskQueue = "spoon: 0\nplate: 1\nfork: 0".parse().unwrap();
        let washer = Washer::new(zero_times(), Stopwatch::start());
        let mut end = Recorder::default();
        assert_eq!(washer.work(&mut end, &tasks).unwrap(), 1);
        assert_eq!(end.puts.len(), 1);
        assert!(end.puts[0].terminal);
        assert!(!end.aborted);
    }

    #[test]
    fn wiper_stops_at_terminal() {
        let mut end = Script {
            items: VecDeque::from(vec![
                Item::new("plate", false).unwrap(),
                Item::new("cup", true).unwrap(),
                Item::new("plate", false).unwrap(),
            ]),
            last: false,
            aborted: false,
        };
        let wiper = Wiper::new(zero_times(), Stopwatch::start());
        let got = wiper.work(&mut end).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got[1].terminal);
        assert_eq!(end.items.len(), 1);
    }

    #[test]
    fn wiper_aborts_when_peer_vanishes() {
        let mut end = Script {
            items: VecDeque::from(vec![Item::new("plate", false).unwrap()]),
            last: false,
            aborted: false,
        };
        let wiper = Wiper::new(zero_times(), Stopwatch::start());
        assert!(matches!(
            wiper.work(&mut end),
            Err(Error::PeerAborted { role: Role::Wiper })
        ));
        assert!(end.aborted);
    }
}
