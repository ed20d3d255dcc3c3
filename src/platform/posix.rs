// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX / System V primitives behind the table backends: shared memory
// mappings, System V semaphore sets and message queues, process-shared
// unnamed semaphores, FIFOs, pipes and fork/wait.
//
// Wrappers here never remove kernel objects on drop. Removal is an explicit
// call made once by whoever owns the table (see `backend::TableResources`).

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use crate::error::cvt;
use crate::shm_name;

/// Run a libc call, retrying while it fails with `EINTR`.
pub(crate) fn retry_eintr<F>(mut f: F) -> io::Result<libc::c_int>
where
    F: FnMut() -> libc::c_int,
{
    loop {
        match cvt(f()) {
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
            other => return other,
        }
    }
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

// ---------------------------------------------------------------------------
// PlatformShm: POSIX shared memory
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    mem: *mut u8,
    size: usize,
    name: String, // POSIX name (with leading '/')
}

// Safety: the shared memory region is process-shared by design; all access to
// its contents goes through atomics and semaphores placed inside it.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Create and map a zero-filled region of `size` bytes. Fails if the
    /// name already exists.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o600;
        let flags = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL;
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, perms as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        // Closed when it drops, whether or not mapping succeeds.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let ret = unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(err);
        }

        Self::map(fd, size, posix_name)
    }

    fn map(fd: OwnedFd, size: usize, posix_name: String) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        drop(fd);

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            mem: mem as *mut u8,
            size,
            name: posix_name,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the name (shm_unlink). Existing mappings stay valid.
    pub fn unlink(&self) -> io::Result<()> {
        let c_name = CString::new(self.name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        cvt(unsafe { libc::shm_unlink(c_name.as_ptr()) }).map(drop)
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        }
    }
}

// ---------------------------------------------------------------------------
// Process-shared unnamed semaphores (sem_t living in shared memory)
// ---------------------------------------------------------------------------

/// Initialise a process-shared counting semaphore in place.
///
/// # Safety
/// `sem` must point to writable memory valid for the semaphore's lifetime
/// and visible to every process that will use it.
pub(crate) unsafe fn sem_init_shared(sem: *mut libc::sem_t, value: u32) -> io::Result<()> {
    cvt(libc::sem_init(sem, 1, value as libc::c_uint)).map(drop)
}

/// # Safety
/// `sem` must have been initialised with [`sem_init_shared`] and not destroyed.
pub(crate) unsafe fn sem_post(sem: *mut libc::sem_t) -> io::Result<()> {
    cvt(libc::sem_post(sem)).map(drop)
}

/// Blocking wait; `EINTR` is retried.
///
/// # Safety
/// Same as [`sem_post`].
pub(crate) unsafe fn sem_wait(sem: *mut libc::sem_t) -> io::Result<()> {
    retry_eintr(|| libc::sem_wait(sem)).map(drop)
}

/// # Safety
/// Same as [`sem_post`]; no thread may be blocked on `sem`.
pub(crate) unsafe fn sem_destroy(sem: *mut libc::sem_t) -> io::Result<()> {
    cvt(libc::sem_destroy(sem)).map(drop)
}

/// Current value.
///
/// # Safety
/// Same as [`sem_post`].
#[cfg(test)]
pub(crate) unsafe fn sem_value(sem: *mut libc::sem_t) -> io::Result<i32> {
    let mut v: libc::c_int = 0;
    cvt(libc::sem_getvalue(sem, &mut v))?;
    Ok(v)
}

// ---------------------------------------------------------------------------
// SemSet: System V semaphore set
// ---------------------------------------------------------------------------

/// A private System V semaphore set. Copyable id; removal is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemSet {
    id: libc::c_int,
}

impl SemSet {
    /// Create a private set with one semaphore per entry of `initial`.
    pub fn create(initial: &[u16]) -> io::Result<Self> {
        let id = cvt(unsafe {
            libc::semget(
                libc::IPC_PRIVATE,
                initial.len() as libc::c_int,
                libc::IPC_CREAT | 0o600,
            )
        })?;
        let set = Self { id };
        for (num, &value) in initial.iter().enumerate() {
            let ret = unsafe {
                libc::semctl(id, num as libc::c_int, libc::SETVAL, value as libc::c_int)
            };
            if let Err(e) = cvt(ret) {
                let _ = set.remove();
                return Err(e);
            }
        }
        Ok(set)
    }

    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// Apply `(semaphore index, delta)` pairs as one atomic `semop`, blocking
    /// until every decrement can be satisfied.
    pub fn op(&self, ops: &[(u16, i16)]) -> io::Result<()> {
        let mut bufs: Vec<libc::sembuf> = ops
            .iter()
            .map(|&(num, delta)| libc::sembuf {
                sem_num: num,
                sem_op: delta,
                sem_flg: 0,
            })
            .collect();
        retry_eintr(|| unsafe { libc::semop(self.id, bufs.as_mut_ptr(), bufs.len()) }).map(drop)
    }

    #[cfg(test)]
    pub fn value(&self, num: u16) -> io::Result<i32> {
        cvt(unsafe { libc::semctl(self.id, num as libc::c_int, libc::GETVAL) })
    }

    /// `IPC_RMID`. Blocked waiters wake with `EIDRM`.
    pub fn remove(&self) -> io::Result<()> {
        cvt(unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) }).map(drop)
    }
}

// ---------------------------------------------------------------------------
// MsgQueue: System V message queue
// ---------------------------------------------------------------------------

/// A System V message record.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, start with a `libc::c_long` message
/// type field, and be valid for any bit pattern of their payload.
pub(crate) unsafe trait MsgRecord: Copy {
    fn mtype(&self) -> libc::c_long;

    /// Payload size as passed to `msgsnd`/`msgrcv` (excludes `mtype`).
    fn payload_len() -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<libc::c_long>()
    }
}

/// A private System V message queue. Copyable id; removal is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgQueue {
    id: libc::c_int,
}

impl MsgQueue {
    pub fn create() -> io::Result<Self> {
        let id = cvt(unsafe { libc::msgget(libc::IPC_PRIVATE, libc::IPC_CREAT | 0o600) })?;
        Ok(Self { id })
    }

    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// Send, blocking while the queue is full.
    pub(crate) fn send<M: MsgRecord>(&self, msg: &M) -> io::Result<()> {
        self.send_with(msg, 0)
    }

    /// Send without blocking; a full queue is `EAGAIN`.
    pub(crate) fn try_send<M: MsgRecord>(&self, msg: &M) -> io::Result<()> {
        self.send_with(msg, libc::IPC_NOWAIT)
    }

    fn send_with<M: MsgRecord>(&self, msg: &M, flags: libc::c_int) -> io::Result<()> {
        debug_assert!(msg.mtype() > 0);
        retry_eintr(|| unsafe {
            libc::msgsnd(
                self.id,
                msg as *const M as *const libc::c_void,
                M::payload_len(),
                flags,
            )
        })
        .map(drop)
    }

    /// Block until a message of type `mtype` arrives.
    pub(crate) fn recv<M: MsgRecord>(&self, mtype: libc::c_long) -> io::Result<M> {
        let mut msg = std::mem::MaybeUninit::<M>::zeroed();
        loop {
            let n = unsafe {
                libc::msgrcv(
                    self.id,
                    msg.as_mut_ptr() as *mut libc::c_void,
                    M::payload_len(),
                    mtype,
                    0,
                )
            };
            if n >= 0 {
                if n as usize != M::payload_len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("message of {n} bytes, expected {}", M::payload_len()),
                    ));
                }
                // Safety: zero-initialised and then filled by the kernel; any bit
                // pattern is valid per the `MsgRecord` contract.
                return Ok(unsafe { msg.assume_init() });
            }
            let e = io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::EINTR) {
                return Err(e);
            }
        }
    }

    /// `IPC_RMID`. Blocked senders/receivers wake with `EIDRM`.
    pub fn remove(&self) -> io::Result<()> {
        cvt(unsafe { libc::msgctl(self.id, libc::IPC_RMID, ptr::null_mut()) }).map(drop)
    }
}

// ---------------------------------------------------------------------------
// FIFOs and pipes
// ---------------------------------------------------------------------------

pub fn make_fifo(path: &Path) -> io::Result<()> {
    let c = c_path(path)?;
    cvt(unsafe { libc::mkfifo(c.as_ptr(), 0o600) }).map(drop)
}

/// Anonymous pipe as `(read end, write end)`.
pub fn pipe() -> io::Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    // Safety: both descriptors were just returned by pipe() and are owned here.
    let (r, w) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((File::from(r), File::from(w)))
}

// ---------------------------------------------------------------------------
// fork / waitpid
// ---------------------------------------------------------------------------

pub enum Fork {
    Child,
    Parent(libc::pid_t),
}

/// # Safety
/// The caller must only run code in the child that is sound after `fork`
/// (no locks held by other threads may be needed) and must leave the child
/// through [`exit_child`].
pub unsafe fn fork() -> io::Result<Fork> {
    match cvt(libc::fork())? {
        0 => Ok(Fork::Child),
        pid => Ok(Fork::Parent(pid)),
    }
}

/// Leave a forked child without running the parent's destructors or
/// atexit handlers.
pub fn exit_child(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// How a waited-for child ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    pub exited: bool,
    pub exit_code: i32,
    pub signaled: bool,
    pub signal: i32,
}

impl WaitResult {
    pub fn success(&self) -> bool {
        self.exited && self.exit_code == 0
    }
}

/// Block until `pid` exits.
pub fn wait_for_exit(pid: libc::pid_t) -> io::Result<WaitResult> {
    let mut status: libc::c_int = 0;
    loop {
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == pid {
            break;
        }
        let e = io::Error::last_os_error();
        if ret == -1 && e.raw_os_error() != Some(libc::EINTR) {
            return Err(e);
        }
    }
    let mut r = WaitResult::default();
    if libc::WIFEXITED(status) {
        r.exited = true;
        r.exit_code = libc::WEXITSTATUS(status);
    }
    if libc::WIFSIGNALED(status) {
        r.signaled = true;
        r.signal = libc::WTERMSIG(status);
    }
    Ok(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn sem_set_counts() {
        let set = SemSet::create(&[0, 3]).unwrap();
        assert_eq!(set.value(0).unwrap(), 0);
        assert_eq!(set.value(1).unwrap(), 3);
        set.op(&[(0, 1), (1, -1)]).unwrap();
        assert_eq!(set.value(0).unwrap(), 1);
        assert_eq!(set.value(1).unwrap(), 2);
        set.remove().unwrap();
        assert!(set.remove().is_err());
    }

    #[derive(Clone, Copy)]
    #[repr(C)]
    struct Ping {
        mtype: libc::c_long,
        value: i32,
    }

    unsafe impl MsgRecord for Ping {
        fn mtype(&self) -> libc::c_long {
            self.mtype
        }
    }

    #[test]
    fn msg_queue_filters_by_type() {
        let q = MsgQueue::create().unwrap();
        q.send(&Ping { mtype: 2, value: 20 }).unwrap();
        q.send(&Ping { mtype: 1, value: 10 }).unwrap();
        let first: Ping = q.recv(1).unwrap();
        assert_eq!(first.value, 10);
        let second: Ping = q.recv(2).unwrap();
        assert_eq!(second.value, 20);
        q.remove().unwrap();
    }

    #[test]
    fn pipe_carries_bytes() {
        let (mut r, mut w) = pipe().unwrap();
        w.write_all(b"abc").unwrap();
        drop(w);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    fn shm_exists(posix_name: &str) -> bool {
        let c_name = CString::new(posix_name).unwrap();
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd == -1 {
            return false;
        }
        unsafe { libc::close(fd) };
        true
    }

    #[test]
    fn shm_create_is_exclusive() {
        let name = shm_name::unique_name("posix_shm");
        let shm = PlatformShm::create(&name, 64).unwrap();
        assert!(PlatformShm::create(&name, 64).is_err());
        assert!(shm_exists(shm.name()));
        let bytes = unsafe { std::slice::from_raw_parts(shm.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));

        shm.unlink().unwrap();
        assert!(!shm_exists(shm.name()));
        assert!(shm.unlink().is_err());
    }

    #[test]
    fn shm_rejects_empty_name_and_size() {
        assert!(PlatformShm::create("", 64).is_err());
        assert!(PlatformShm::create(&shm_name::unique_name("posix_shm"), 0).is_err());
    }
}
