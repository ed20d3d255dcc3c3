// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy shared by the configuration loader, the table backends and
// both roles. Every variant is fatal to whoever observes it.

use std::io;

use thiserror::Error;

use crate::role::Role;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A primitive (pipe, queue, segment, semaphore, socket, FIFO, context)
    /// could not be created before work started.
    #[error("setup failed while {what}: {source}")]
    Setup {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// A read/write/send/receive/semaphore operation failed mid-run.
    #[error("error while {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Malformed frame or shared slot.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The other role signalled abort or closed its end of the table.
    #[error("{role} gave up: the other side of the table aborted")]
    PeerAborted { role: Role },

    #[error("consumer failed: {0}")]
    ConsumerFailed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("line {line}: expected dish type")]
    MissingType { line: usize },
    #[error("line {line}: expected ':' delimiter")]
    MissingDelimiter { line: usize },
    #[error("line {line}: expected a value after ':'")]
    MissingValue { line: usize },
    #[error("line {line}: invalid value {value:?} (expected a non-negative integer)")]
    InvalidValue { line: usize, value: String },
    #[error("line {line}: dish type {kind:?} is longer than {max} bytes")]
    TypeTooLong { line: usize, kind: String, max: usize },
    #[error("no {table} time for dish type {kind:?}")]
    UnknownType { table: &'static str, kind: String },
    #[error("table limit must be a positive integer, got {0}")]
    Capacity(String),
    #[error("task queue contains no dishes")]
    EmptyWorkload,
    #[error("unexpected {what}: {value:?} (expected one of {expected})")]
    UnknownName {
        what: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Error {
    pub(crate) fn setup(what: &'static str, source: io::Error) -> Self {
        Error::Setup { what, source }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io { op, source }
    }

    /// Classify a stream error seen by `role`: a closed peer end is an abort,
    /// a malformed frame is a protocol violation, anything else is I/O.
    pub(crate) fn stream(role: Role, op: &'static str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => Error::PeerAborted { role },
            io::ErrorKind::InvalidData => Error::Protocol(source.to_string()),
            _ => Error::Io { op, source },
        }
    }

    /// Classify a System V call failure: a removed object means the peer
    /// (or the owner) tore the table down.
    pub(crate) fn sysv(role: Role, op: &'static str, source: io::Error) -> Self {
        match source.raw_os_error() {
            Some(libc::EIDRM) | Some(libc::EINVAL) => Error::PeerAborted { role },
            _ => Error::Io { op, source },
        }
    }
}

/// Map a `-1` return from a libc call to the current `errno`.
pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_stream_is_peer_abort() {
        let e = Error::stream(Role::Wiper, "read", io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(e, Error::PeerAborted { role: Role::Wiper }));

        let e = Error::stream(Role::Washer, "write", io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(e, Error::PeerAborted { role: Role::Washer }));
    }

    #[test]
    fn other_stream_errors_stay_io() {
        let e = Error::stream(Role::Wiper, "read", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(e, Error::Io { op: "read", .. }));
    }

    #[test]
    fn invalid_data_is_protocol_violation() {
        let e = Error::stream(
            Role::Wiper,
            "read",
            io::Error::new(io::ErrorKind::InvalidData, "bad frame"),
        );
        assert!(matches!(e, Error::Protocol(_)));
    }

    #[test]
    fn removed_sysv_object_is_peer_abort() {
        let e = Error::sysv(Role::Washer, "semop", io::Error::from_raw_os_error(libc::EIDRM));
        assert!(matches!(e, Error::PeerAborted { .. }));
        let e = Error::sysv(Role::Washer, "semop", io::Error::from_raw_os_error(libc::EAGAIN));
        assert!(matches!(e, Error::Io { .. }));
    }

    #[test]
    fn cvt_maps_minus_one() {
        assert_eq!(cvt(3).unwrap(), 3);
        assert!(cvt(-1).is_err());
    }
}
