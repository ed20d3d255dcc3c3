// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Token-bucket table over two byte streams, shared by the pipe and socket
// backends:
//
//   - the item stream carries framed dishes, washer → wiper;
//   - the token stream carries one byte per free slot, wiper → washer,
//     preloaded with `capacity` bytes.
//
// Each end owns exactly the two stream halves it uses; dropping an end
// closes them, which the peer sees as end of stream / broken pipe.

use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

use tracing::debug;

use crate::error::{cvt, Error, Result};
use crate::item::{read_frame, write_frame, Item};
use crate::role::Role;

const TOKEN: [u8; 1] = [0];

/// When the wiper hands its slot token back relative to reading the dish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenOrder {
    /// Read the dish, then free its slot.
    AfterTake,
    /// Free a slot, then wait for the dish (the slot being freed is the one
    /// the wiper is about to empty).
    BeforeTake,
}

/// Fill the token stream with `n` tokens without ever blocking: a capacity
/// the stream buffer cannot hold is a setup error, not a deadlock.
pub(crate) fn preload_tokens<W: Write + AsRawFd>(w: &mut W, n: usize) -> Result<()> {
    let fd = w.as_raw_fd();
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })
        .map_err(|e| Error::setup("reading token stream flags", e))?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })
        .map_err(|e| Error::setup("making token stream non-blocking", e))?;

    let result = w.write_all(&vec![TOKEN[0]; n]).map_err(|e| {
        if e.kind() == io::ErrorKind::WouldBlock {
            Error::setup(
                "preloading free-slot tokens",
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("table limit {n} exceeds the stream buffer"),
                ),
            )
        } else {
            Error::setup("preloading free-slot tokens", e)
        }
    });

    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })
        .map_err(|e| Error::setup("restoring token stream flags", e))?;
    result
}

pub(crate) struct StreamWasher<R, W> {
    items: Option<W>,
    tokens: Option<R>,
}

impl<R: Read, W: Write> StreamWasher<R, W> {
    pub(crate) fn new(items: W, tokens: R) -> Self {
        Self {
            items: Some(items),
            tokens: Some(tokens),
        }
    }

    pub(crate) fn put(&mut self, item: &Item) -> Result<()> {
        let (Some(items), Some(tokens)) = (self.items.as_mut(), self.tokens.as_mut()) else {
            return Err(closed());
        };
        let mut token = [0u8; 1];
        tokens
            .read_exact(&mut token)
            .map_err(|e| Error::stream(Role::Washer, "waiting for a free slot", e))?;
        write_frame(items, item).map_err(|e| Error::stream(Role::Washer, "writing dish", e))
    }

    /// Close the item stream; buffered dishes stay readable. The token stream
    /// stays open until the end is dropped so the wiper can keep returning
    /// slots.
    pub(crate) fn after(&mut self) -> Result<()> {
        self.items = None;
        Ok(())
    }

    pub(crate) fn abort(&mut self) {
        self.items = None;
        self.tokens = None;
    }
}

pub(crate) struct StreamWiper<R, W> {
    items: Option<R>,
    tokens: Option<W>,
    order: TokenOrder,
    took_last: bool,
}

impl<R: Read, W: Write> StreamWiper<R, W> {
    pub(crate) fn new(items: R, tokens: W, order: TokenOrder) -> Self {
        Self {
            items: Some(items),
            tokens: Some(tokens),
            order,
            took_last: false,
        }
    }

    pub(crate) fn take(&mut self) -> Result<Item> {
        let (Some(items), Some(tokens)) = (self.items.as_mut(), self.tokens.as_mut()) else {
            return Err(closed());
        };
        if self.order == TokenOrder::BeforeTake {
            give_token(tokens)?;
        }
        let item = read_frame(items).map_err(|e| Error::stream(Role::Wiper, "reading dish", e))?;
        if self.order == TokenOrder::AfterTake {
            give_token(tokens)?;
        }
        self.took_last = item.terminal;
        Ok(item)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.took_last
    }

    pub(crate) fn after(&mut self) -> Result<()> {
        self.items = None;
        self.tokens = None;
        Ok(())
    }

    pub(crate) fn abort(&mut self) {
        self.items = None;
        self.tokens = None;
    }
}

/// A washer that has already closed its token end has put its last dish;
/// anything it wrote is still readable, and an abort shows up as EOF on the
/// dish stream.
fn give_token<W: Write>(tokens: &mut W) -> Result<()> {
    match tokens.write_all(&TOKEN) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("washer closed its token stream");
            Ok(())
        }
        res => res.map_err(|e| Error::stream(Role::Wiper, "freeing a slot", e)),
    }
}

fn closed() -> Error {
    Error::io(
        "using a closed table end",
        io::Error::from(io::ErrorKind::NotConnected),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair(order: TokenOrder, n: usize) -> (StreamWasher<UnixStream, UnixStream>, StreamWiper<UnixStream, UnixStream>) {
        let (dish_w, dish_r) = UnixStream::pair().unwrap();
        let (mut space_w, space_r) = UnixStream::pair().unwrap();
        preload_tokens(&mut space_w, n).unwrap();
        (
            StreamWasher::new(dish_w, space_r),
            StreamWiper::new(dish_r, space_w, order),
        )
    }

    #[test]
    fn last_dish_is_readable_after_washer_leaves() {
        for order in [TokenOrder::AfterTake, TokenOrder::BeforeTake] {
            let (mut washer, mut wiper) = pair(order, 2);
            washer.put(&Item::new("plate", false).unwrap()).unwrap();
            washer.put(&Item::new("cup", true).unwrap()).unwrap();
            drop(washer);

            assert_eq!(wiper.take().unwrap().kind, "plate");
            assert!(!wiper.is_done());
            assert!(wiper.take().unwrap().terminal);
            assert!(wiper.is_done());
        }
    }

    #[test]
    fn aborted_washer_reads_as_peer_abort() {
        let (mut washer, mut wiper) = pair(TokenOrder::BeforeTake, 1);
        washer.abort();
        assert!(matches!(
            wiper.take(),
            Err(Error::PeerAborted { role: Role::Wiper })
        ));
    }

    #[test]
    fn closed_end_refuses_work() {
        let (mut washer, _wiper) = pair(TokenOrder::AfterTake, 1);
        washer.after().unwrap();
        assert!(matches!(
            washer.put(&Item::new("plate", true).unwrap()),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn oversized_preload_is_a_setup_error() {
        let (mut w, _r) = UnixStream::pair().unwrap();
        let err = preload_tokens(&mut w, 64 << 20).unwrap_err();
        assert!(matches!(err, Error::Setup { .. }));
    }
}
