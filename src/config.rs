// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Run configuration: duration tables, the wash task queue, the table limit
// and the backend/isolation selectors.
//
// Both file formats are line oriented:
//
//     <dish type>: <non-negative integer>
//
// For duration tables the integer is seconds; for the task queue it is the
// number of dishes, and line order is processing order.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::item::MAX_TYPE_LEN;

/// Split one `<type>: <n>` line. `line` is 1-based and only used for errors.
fn parse_line(line: usize, text: &str) -> Result<(String, u64), ConfigError> {
    let (kind, value) = match text.split_once(':') {
        Some(parts) => parts,
        None if text.trim().is_empty() => return Err(ConfigError::MissingType { line }),
        None => return Err(ConfigError::MissingDelimiter { line }),
    };
    let kind = kind.trim();
    if kind.is_empty() {
        return Err(ConfigError::MissingType { line });
    }
    if kind.len() > MAX_TYPE_LEN {
        return Err(ConfigError::TypeTooLong {
            line,
            kind: kind.to_owned(),
            max: MAX_TYPE_LEN,
        });
    }
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingValue { line });
    }
    let n = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        line,
        value: value.to_owned(),
    })?;
    Ok((kind.to_owned(), n))
}

/// Non-blank lines with their 1-based line numbers.
fn lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim().is_empty())
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// DurationTable
// ---------------------------------------------------------------------------

/// Dish type → seconds of simulated work. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurationTable {
    secs: HashMap<String, u64>,
}

impl DurationTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read(path.as_ref())?.parse()
    }

    pub fn get(&self, kind: &str) -> Option<Duration> {
        self.secs.get(kind).copied().map(Duration::from_secs)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.secs.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.secs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secs.is_empty()
    }
}

impl FromStr for DurationTable {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut secs = HashMap::new();
        for (n, text) in lines(s) {
            let (kind, value) = parse_line(n, text)?;
            secs.insert(kind, value);
        }
        Ok(Self { secs })
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for DurationTable {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self {
            secs: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WashTask {
    pub kind: String,
    pub count: u64,
}

/// Ordered wash tasks, consumed front to back by the washer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQueue {
    tasks: Vec<WashTask>,
}

impl TaskQueue {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read(path.as_ref())?.parse()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WashTask> {
        self.tasks.iter()
    }

    /// Total number of dishes across all tasks.
    pub fn total(&self) -> u64 {
        self.tasks.iter().map(|t| t.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Index of the last task that produces at least one dish. Its final unit
    /// is the terminal dish of the whole run.
    pub fn last_nonempty(&self) -> Option<usize> {
        self.tasks.iter().rposition(|t| t.count > 0)
    }
}

impl FromStr for TaskQueue {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tasks = Vec::new();
        for (n, text) in lines(s) {
            let (kind, count) = parse_line(n, text)?;
            tasks.push(WashTask { kind, count });
        }
        Ok(Self { tasks })
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for TaskQueue {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self {
            tasks: iter
                .into_iter()
                .map(|(kind, count)| WashTask {
                    kind: kind.into(),
                    count,
                })
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TaskQueue {
    type Item = &'a WashTask;
    type IntoIter = std::slice::Iter<'a, WashTask>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Capacity
// ---------------------------------------------------------------------------

/// Table limit. Zero is rejected: a zero-capacity table can never accept a
/// dish and every backend would deadlock on the first put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Capacity(NonZeroUsize);

impl Capacity {
    pub fn new(n: usize) -> Result<Self, ConfigError> {
        NonZeroUsize::new(n)
            .map(Self)
            .ok_or_else(|| ConfigError::Capacity(n.to_string()))
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl FromStr for Capacity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = s
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::Capacity(s.to_owned()))?;
        Self::new(n)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Which IPC substrate carries the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Fifo,
    Pipe,
    Msg,
    Shm,
    Socket,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Fifo,
        BackendKind::Pipe,
        BackendKind::Msg,
        BackendKind::Shm,
        BackendKind::Socket,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Fifo => "fifo",
            BackendKind::Pipe => "pipe",
            BackendKind::Msg => "msg",
            BackendKind::Shm => "shm",
            BackendKind::Socket => "socket",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownName {
                what: "type of workers",
                value: s.to_owned(),
                expected: "fifo, pipe, msg, shm, socket",
            })
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the wiper runs relative to the washer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Isolation {
    /// A spawned thread sharing the process.
    #[default]
    Thread,
    /// A forked child process.
    Process,
}

impl FromStr for Isolation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thread" => Ok(Isolation::Thread),
            "process" => Ok(Isolation::Process),
            _ => Err(ConfigError::UnknownName {
                what: "isolation",
                value: s.to_owned(),
                expected: "thread, process",
            }),
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Isolation::Thread => "thread",
            Isolation::Process => "process",
        })
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Everything one run of the kitchen needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub washing_times: DurationTable,
    pub wiping_times: DurationTable,
    pub tasks: TaskQueue,
    pub table_limit: Capacity,
    pub backend: BackendKind,
    pub isolation: Isolation,
}

impl RunConfig {
    /// Reject configurations that cannot complete: no dishes at all (no
    /// terminal dish would ever be produced) or a dish type either role has
    /// no time for.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks.total() == 0 {
            return Err(ConfigError::EmptyWorkload);
        }
        for task in self.tasks.iter().filter(|t| t.count > 0) {
            if !self.washing_times.contains(&task.kind) {
                return Err(ConfigError::UnknownType {
                    table: "washing",
                    kind: task.kind.clone(),
                });
            }
            if !self.wiping_times.contains(&task.kind) {
                return Err(ConfigError::UnknownType {
                    table: "wiping",
                    kind: task.kind.clone(),
                });
            }
        }
        Ok(())
    }
}
