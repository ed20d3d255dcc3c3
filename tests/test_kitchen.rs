// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Whole runs from configuration files: load, validate, open, wash, join,
// release.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use dishrack::{
    BackendKind, Capacity, ConfigError, DurationTable, Error, Isolation, Kitchen, RunConfig,
    TaskQueue,
};

struct Files {
    _dir: TempDir,
    washing: PathBuf,
    wiping: PathBuf,
    dishes: PathBuf,
}

fn write_files(washing: &str, wiping: &str, dishes: &str) -> Files {
    let dir = tempfile::tempdir().unwrap();
    let path = |name: &str, body: &str| {
        let p = dir.path().join(name);
        fs::write(&p, body).unwrap();
        p
    };
    Files {
        washing: path("washing.txt", washing),
        wiping: path("wiping.txt", wiping),
        dishes: path("dishes.txt", dishes),
        _dir: dir,
    }
}

fn load(files: &Files, limit: usize, backend: BackendKind) -> Result<RunConfig, ConfigError> {
    Ok(RunConfig {
        washing_times: DurationTable::load(&files.washing)?,
        wiping_times: DurationTable::load(&files.wiping)?,
        tasks: TaskQueue::load(&files.dishes)?,
        table_limit: Capacity::new(limit)?,
        backend,
        isolation: Isolation::Thread,
    })
}

#[test]
fn every_backend_runs_from_files() {
    let files = write_files(
        "plate: 0\ncup :0\n\nbowl: 0\n",
        "plate: 0\ncup: 0\nbowl:0",
        "plate: 2\ncup: 1\nbowl: 0\n",
    );
    for backend in BackendKind::ALL {
        let cfg = load(&files, 1, backend).unwrap();
        let report = Kitchen::new(cfg).unwrap().run().unwrap();
        assert_eq!(report.washed, 3, "{backend}");
        let wiped = report.wiped.unwrap();
        let kinds: Vec<_> = wiped.iter().map(|i| i.kind.as_str()).collect();
        assert_eq!(kinds, ["plate", "plate", "cup"], "{backend}");
        assert!(wiped[2].terminal, "{backend}");
    }
}

#[test]
fn durations_are_spent_on_both_sides() {
    use std::time::{Duration, Instant};

    let files = write_files("plate: 1", "plate: 1", "plate: 1");
    let cfg = load(&files, 1, BackendKind::Pipe).unwrap();
    let started = Instant::now();
    Kitchen::new(cfg).unwrap().run().unwrap();
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[test]
fn zero_table_limit_is_rejected() {
    let files = write_files("plate: 0", "plate: 0", "plate: 1");
    let err = load(&files, 0, BackendKind::Shm).unwrap_err();
    assert!(matches!(err, ConfigError::Capacity(_)), "{err:?}");
    assert!(matches!("0".parse::<Capacity>(), Err(ConfigError::Capacity(_))));
}

#[test]
fn empty_workload_is_rejected() {
    let files = write_files("plate: 0", "plate: 0", "plate: 0\n\ncup: 0");
    let cfg = load(&files, 2, BackendKind::Msg).unwrap();
    assert!(matches!(
        Kitchen::new(cfg),
        Err(Error::Config(ConfigError::EmptyWorkload))
    ));
}

#[test]
fn missing_wiping_time_is_rejected() {
    let files = write_files("plate: 0\ncup: 0", "plate: 0", "plate: 1\ncup: 1");
    let cfg = load(&files, 2, BackendKind::Fifo).unwrap();
    match Kitchen::new(cfg) {
        Err(Error::Config(ConfigError::UnknownType { table, kind })) => {
            assert_eq!(table, "wiping");
            assert_eq!(kind, "cup");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn zero_count_tasks_need_no_times() {
    let files = write_files("plate: 0", "plate: 0", "spoon: 0\nplate: 1");
    let cfg = load(&files, 1, BackendKind::Socket).unwrap();
    assert_eq!(Kitchen::new(cfg).unwrap().run().unwrap().washed, 1);
}

#[test]
fn malformed_file_reports_line() {
    let files = write_files("plate: 0\n\ncup 3\n", "plate: 0", "plate: 1");
    let err = DurationTable::load(&files.washing).unwrap_err();
    assert!(matches!(err, ConfigError::MissingDelimiter { line: 3 }), "{err:?}");
}

#[test]
fn unreadable_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.txt");
    match TaskQueue::load(&missing) {
        Err(ConfigError::Read { path, .. }) => assert!(path.ends_with("nope.txt")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn names_parse_and_print() {
    for backend in BackendKind::ALL {
        assert_eq!(backend.to_string().parse::<BackendKind>().unwrap(), backend);
    }
    assert!(matches!(
        "carrier-pigeon".parse::<BackendKind>(),
        Err(ConfigError::UnknownName { what: "type of workers", .. })
    ));
    assert_eq!("process".parse::<Isolation>().unwrap(), Isolation::Process);
    assert_eq!(Isolation::default(), Isolation::Thread);
}
