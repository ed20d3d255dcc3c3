// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Anonymous-pipe table: one pipe for framed dishes, one pipe as a token
// bucket of free slots.

use std::fs::File;

use tracing::debug;

use super::stream::{preload_tokens, StreamWasher, StreamWiper, TokenOrder};
use super::{Owned, PutEnd, Table, TableResources, TakeEnd, WasherEnd, WiperEnd};
use crate::config::{BackendKind, Capacity};
use crate::error::{Error, Result};
use crate::item::Item;
use crate::platform::posix;

pub(crate) fn open(capacity: Capacity) -> Result<Table> {
    let (dish_r, dish_w) = posix::pipe().map_err(|e| Error::setup("creating dish pipe", e))?;
    let (space_r, mut space_w) =
        posix::pipe().map_err(|e| Error::setup("creating free-space pipe", e))?;
    preload_tokens(&mut space_w, capacity.get())?;
    debug!(capacity = capacity.get(), "pipe table ready");

    Ok(Table {
        resources: TableResources::new(BackendKind::Pipe, Owned::Streams),
        washer: WasherEnd::Pipe(PipeWasher(StreamWasher::new(dish_w, space_r))),
        wiper: WiperEnd::Pipe(PipeWiper(StreamWiper::new(
            dish_r,
            space_w,
            TokenOrder::AfterTake,
        ))),
    })
}

/// Owns the dish pipe's write end and the free-space pipe's read end.
pub struct PipeWasher(StreamWasher<File, File>);

/// Owns the dish pipe's read end and the free-space pipe's write end.
pub struct PipeWiper(StreamWiper<File, File>);

impl PutEnd for PipeWasher {
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

impl TakeEnd for PipeWiper {
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
