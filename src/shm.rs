// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared memory handle. Delegates to platform::PlatformShm.

use std::io;

use crate::platform::PlatformShm;

/// A named, inter-process shared memory region.
///
/// Dropping the handle unmaps the region but leaves the name in place;
/// call [`ShmHandle::unlink`] once when the segment is no longer needed.
pub struct ShmHandle {
    inner: PlatformShm,
}

impl ShmHandle {
    /// Create and map a new region of `size` bytes, zero-filled. Fails if
    /// `name` is already taken.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        let inner = PlatformShm::create(name, size)?;
        Ok(Self { inner })
    }

    /// Pointer to the start of the shared memory region.
    pub fn as_ptr(&self) -> *const u8 {
        self.inner.as_ptr()
    }

    /// The POSIX name used to open the segment.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Remove the name. Existing mappings stay valid until dropped.
    pub fn unlink(&self) -> io::Result<()> {
        self.inner.unlink()
    }
}
