// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Socket-pair table: the pipe table's protocol over two AF_UNIX stream
// socket pairs. Only the transport differs.

use std::net::Shutdown;
use std::os::unix::net::UnixStream;

use tracing::debug;

use super::stream::{preload_tokens, StreamWasher, StreamWiper, TokenOrder};
use super::{Owned, PutEnd, Table, TableResources, TakeEnd, WasherEnd, WiperEnd};
use crate::config::{BackendKind, Capacity};
use crate::error::{Error, Result};
use crate::item::Item;

pub(crate) fn open(capacity: Capacity) -> Result<Table> {
    let (dish_w, dish_r) =
        UnixStream::pair().map_err(|e| Error::setup("creating dish socket pair", e))?;
    let (mut space_w, space_r) =
        UnixStream::pair().map_err(|e| Error::setup("creating free-space socket pair", e))?;

    // Each pair is used in one direction only.
    for (sock, how) in [
        (&dish_w, Shutdown::Read),
        (&dish_r, Shutdown::Write),
        (&space_w, Shutdown::Read),
        (&space_r, Shutdown::Write),
    ] {
        sock.shutdown(how)
            .map_err(|e| Error::setup("shutting down unused socket direction", e))?;
    }

    preload_tokens(&mut space_w, capacity.get())?;
    debug!(capacity = capacity.get(), "socket table ready");

    Ok(Table {
        resources: TableResources::new(BackendKind::Socket, Owned::Streams),
        washer: WasherEnd::Socket(SocketWasher(StreamWasher::new(dish_w, space_r))),
        wiper: WiperEnd::Socket(SocketWiper(StreamWiper::new(
            dish_r,
            space_w,
            TokenOrder::BeforeTake,
        ))),
    })
}

pub struct SocketWasher(StreamWasher<UnixStream, UnixStream>);

pub struct SocketWiper(StreamWiper<UnixStream, UnixStream>);

impl PutEnd for SocketWasher {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn put(&mut self, item: &Item) -> Result<()> {
        self.0.put(item)
    }

    fn after(&mut self) -> Result<()> {
        self.0.after()
    }

    fn abort(&mut self) {
        self.0.abort()
    }
}

impl TakeEnd for SocketWiper {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn take(&mut self) -> Result<Item> {
        self.0.take()
    }

    fn is_done(&self) -> bool {
        self.0.is_done()
    }

    fn after(&mut self) -> Result<()> {
        self.0.after()
    }

    fn abort(&mut self) {
        self.0.abort()
    }
}
