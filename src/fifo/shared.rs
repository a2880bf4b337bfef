/*!
 * Process-Shared FIFO
 *
 * The cross-process variant of the bounded FIFO. A single named
 * `shm_open` segment holds the control block (slot counters, a
 * process-shared `pthread` mutex and two condition variables) followed
 * by `slots_max` fixed-size chunks of `chunk_size_max` bytes each.
 * Elements are inline bytes copied into the pool — never pointers — so
 * the segment is position-independent: every accessor is computed from
 * the mapped base address plus a stored offset, re-derived
 * independently by each process that attaches.
 *
 * `chunk_size_max > 0` is mandatory; duplication is implicit (a byte
 * copy into the pool) since there is no function pointer that could
 * cross the process boundary — external element callbacks have no
 * meaning for a process-shared FIFO and are rejected.
 *
 * Linux-only: process-shared `pthread` primitives and `shm_open` have no
 * portable Windows equivalent, and the timed wait additionally depends
 * on `pthread_condattr_setclock(CLOCK_MONOTONIC)`, a glibc extension
 * absent from other Unix `libc`s (e.g. macOS), so this module is
 * compiled only under `cfg(target_os = "linux")` (gated at the
 * `mod shared;` declaration in `fifo/mod.rs`).
 */

use crate::core::{MpResult, Status};
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::CString;
use std::mem::size_of;
use std::os::fd::AsFd;
use std::os::unix::io::OwnedFd;
use std::ptr::NonNull;
use std::time::Duration;

const MAGIC: u32 = 0x4d50_4653; // "MPFS"

#[repr(C)]
struct Header {
    magic: u32,
    slots_max: usize,
    chunk_size_max: usize,
    slots_used: usize,
    buf_level: usize,
    input_idx: usize,
    output_idx: usize,
    closed: bool,
    non_blocking: bool,
    mutex: libc::pthread_mutex_t,
    cond_put: libc::pthread_cond_t,
    cond_get: libc::pthread_cond_t,
}

#[repr(C)]
struct SlotHeader {
    occupied: bool,
    len: usize,
}

fn slot_stride(chunk_size_max: usize) -> usize {
    size_of::<SlotHeader>() + chunk_size_max
}

fn segment_len(slots_max: usize, chunk_size_max: usize) -> usize {
    size_of::<Header>() + slots_max * slot_stride(chunk_size_max)
}

/// A process-shared, byte-element-only FIFO backed by a named POSIX
/// shared memory segment.
pub struct SharedFifo {
    base: NonNull<u8>,
    len: usize,
    _fd: OwnedFd,
    name: String,
    owner: bool,
}

// SAFETY: all mutable access to the mapped region goes through the
// segment's own process-shared mutex; the raw pointer itself carries no
// thread-local state.
unsafe impl Send for SharedFifo {}
unsafe impl Sync for SharedFifo {}

impl SharedFifo {
    fn header(&self) -> *mut Header {
        self.base.as_ptr().cast()
    }

    fn pool_base(&self) -> *mut u8 {
        // SAFETY: header is always followed immediately by the slot pool.
        unsafe { self.base.as_ptr().add(size_of::<Header>()) }
    }

    fn slot_ptr(&self, idx: usize, chunk_size_max: usize) -> *mut SlotHeader {
        let stride = slot_stride(chunk_size_max);
        // SAFETY: idx < slots_max is a caller invariant upheld by open()/push()/pull().
        unsafe { self.pool_base().add(idx * stride).cast() }
    }

    /// Create a new named process-shared FIFO. Fails if `name` already
    /// exists. `chunk_size_max` must be non-zero.
    pub fn shm_open(name: &str, slots_max: usize, chunk_size_max: usize) -> MpResult<Self> {
        if chunk_size_max == 0 {
            return Err(Status::InvalidArgument(
                "chunk_size_max must be > 0 for a shared FIFO".into(),
            ));
        }
        if slots_max == 0 {
            return Err(Status::InvalidArgument("slots_max must be > 0".into()));
        }

        let cname = shm_name(name)?;
        let fd = shm_open(
            &cname,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| Status::InvalidArgument(format!("shm_open {name}: {e}")))?;

        let len = segment_len(slots_max, chunk_size_max);
        ftruncate(fd.as_fd(), len as i64)
            .map_err(|e| Status::Error(format!("ftruncate {name}: {e}")))?;

        let base = map(&fd, len)?;
        let fifo = Self {
            base,
            len,
            _fd: fd,
            name: name.to_string(),
            owner: true,
        };

        // SAFETY: we just created and mapped this segment; nothing else
        // can be racing us to initialize it.
        unsafe {
            let hdr = fifo.header();
            (*hdr).magic = MAGIC;
            (*hdr).slots_max = slots_max;
            (*hdr).chunk_size_max = chunk_size_max;
            (*hdr).slots_used = 0;
            (*hdr).buf_level = 0;
            (*hdr).input_idx = 0;
            (*hdr).output_idx = 0;
            (*hdr).closed = false;
            (*hdr).non_blocking = false;
            init_process_shared_mutex(&mut (*hdr).mutex);
            init_process_shared_cond(&mut (*hdr).cond_put);
            init_process_shared_cond(&mut (*hdr).cond_get);
        }

        Ok(fifo)
    }

    /// Attach to a pre-existing named segment created by `shm_open`.
    pub fn shm_exec_open(name: &str) -> MpResult<Self> {
        let cname = shm_name(name)?;
        let fd = shm_open(&cname, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| Status::NotFound(format!("shm_exec_open {name}: {e}")))?;

        // Map just the header first to learn the real segment size.
        let hdr_probe = map(&fd, size_of::<Header>())?;
        let (slots_max, chunk_size_max) = unsafe {
            let hdr: *const Header = hdr_probe.as_ptr().cast();
            if (*hdr).magic != MAGIC {
                let _ = munmap(hdr_probe.cast(), size_of::<Header>());
                return Err(Status::InvalidArgument(format!(
                    "{name} is not a media-processors shared FIFO"
                )));
            }
            ((*hdr).slots_max, (*hdr).chunk_size_max)
        };
        unsafe {
            munmap(hdr_probe.cast(), size_of::<Header>())
                .map_err(|e| Status::Error(format!("munmap probe: {e}")))?;
        }

        let len = segment_len(slots_max, chunk_size_max);
        let base = map(&fd, len)?;

        Ok(Self {
            base,
            len,
            _fd: fd,
            name: name.to_string(),
            owner: false,
        })
    }

    fn slots_max(&self) -> usize {
        unsafe { (*self.header()).slots_max }
    }

    fn chunk_size_max(&self) -> usize {
        unsafe { (*self.header()).chunk_size_max }
    }

    /// Push `data` (<= `chunk_size_max` bytes), blocking until a slot
    /// frees or the FIFO closes.
    pub fn push(&self, data: &[u8]) -> MpResult<()> {
        let chunk_size_max = self.chunk_size_max();
        if data.len() > chunk_size_max {
            return Err(Status::InvalidArgument(format!(
                "payload {} exceeds chunk_size_max {chunk_size_max}",
                data.len()
            )));
        }

        unsafe {
            let hdr = self.header();
            lock(&mut (*hdr).mutex);
            let result = loop {
                if (*hdr).closed {
                    break Err(Status::EndOfFile);
                }
                if (*hdr).slots_used < (*hdr).slots_max {
                    break Ok(());
                }
                if (*hdr).non_blocking {
                    break Err(Status::NoMemory("shared fifo full".into()));
                }
                wait(&mut (*hdr).cond_get, &mut (*hdr).mutex, None);
            };

            if result.is_ok() {
                let idx = (*hdr).input_idx;
                let slot = self.slot_ptr(idx, chunk_size_max);
                (*slot).occupied = true;
                (*slot).len = data.len();
                let payload = (slot as *mut u8).add(size_of::<SlotHeader>());
                std::ptr::copy_nonoverlapping(data.as_ptr(), payload, data.len());

                (*hdr).input_idx = (idx + 1) % (*hdr).slots_max;
                (*hdr).slots_used += 1;
                (*hdr).buf_level += data.len();
                libc::pthread_cond_broadcast(&mut (*hdr).cond_put);
            }

            unlock(&mut (*hdr).mutex);
            result
        }
    }

    /// Pull the oldest element, copying it out of the pool.
    pub fn pull(&self, timeout: Option<Duration>) -> MpResult<Vec<u8>> {
        let chunk_size_max = self.chunk_size_max();
        unsafe {
            let hdr = self.header();
            lock(&mut (*hdr).mutex);
            let result = loop {
                if (*hdr).slots_used > 0 {
                    break Ok(());
                }
                if (*hdr).closed {
                    break Err(Status::EndOfFile);
                }
                if (*hdr).non_blocking {
                    break Err(Status::TryAgain);
                }
                if !wait(&mut (*hdr).cond_put, &mut (*hdr).mutex, timeout) {
                    if (*hdr).slots_used == 0 && !(*hdr).closed {
                        break Err(Status::TimedOut);
                    }
                }
            };

            let out = result.map(|()| {
                let idx = (*hdr).output_idx;
                let slot = self.slot_ptr(idx, chunk_size_max);
                let payload = (slot as *const u8).add(size_of::<SlotHeader>());
                let data = std::slice::from_raw_parts(payload, (*slot).len).to_vec();
                (*slot).occupied = false;
                (*hdr).output_idx = (idx + 1) % (*hdr).slots_max;
                (*hdr).slots_used -= 1;
                (*hdr).buf_level -= data.len();
                libc::pthread_cond_broadcast(&mut (*hdr).cond_get);
                data
            });

            unlock(&mut (*hdr).mutex);
            out
        }
    }

    pub fn set_non_blocking(&self, non_blocking: bool) {
        unsafe {
            let hdr = self.header();
            lock(&mut (*hdr).mutex);
            (*hdr).non_blocking = non_blocking;
            libc::pthread_cond_broadcast(&mut (*hdr).cond_put);
            libc::pthread_cond_broadcast(&mut (*hdr).cond_get);
            unlock(&mut (*hdr).mutex);
        }
    }

    pub fn level(&self) -> usize {
        unsafe {
            let hdr = self.header();
            lock(&mut (*hdr).mutex);
            let v = (*hdr).buf_level;
            unlock(&mut (*hdr).mutex);
            v
        }
    }

    /// Set the exit flag and wake every blocked caller. Only the
    /// creator's close additionally unlinks the name from the system.
    pub fn close(&self) {
        unsafe {
            let hdr = self.header();
            lock(&mut (*hdr).mutex);
            (*hdr).closed = true;
            libc::pthread_cond_broadcast(&mut (*hdr).cond_put);
            libc::pthread_cond_broadcast(&mut (*hdr).cond_get);
            unlock(&mut (*hdr).mutex);
        }
        if self.owner {
            if let Ok(cname) = shm_name(&self.name) {
                let _ = shm_unlink(&cname);
            }
        }
    }
}

impl Drop for SharedFifo {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe the mapping we created in open/exec_open.
        unsafe {
            let _ = munmap(self.base.cast(), self.len);
        }
    }
}

fn shm_name(name: &str) -> MpResult<CString> {
    if name.len() > libc::NAME_MAX as usize || name.is_empty() {
        return Err(Status::InvalidArgument(format!(
            "shared fifo name {name:?} exceeds NAME_MAX or is empty"
        )));
    }
    CString::new(name).map_err(|_| Status::InvalidArgument("name contains a NUL byte".into()))
}

fn map(fd: &OwnedFd, len: usize) -> MpResult<NonNull<u8>> {
    // SAFETY: fd is a valid, just-opened/sized shared memory descriptor.
    unsafe {
        mmap(
            None,
            std::num::NonZeroUsize::new(len).expect("len > 0 checked by caller"),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
        .map(|ptr| ptr.cast::<u8>())
        .map_err(|e| Status::Error(format!("mmap: {e}")))
    }
}

unsafe fn init_process_shared_mutex(m: *mut libc::pthread_mutex_t) {
    let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    libc::pthread_mutexattr_init(&mut attr);
    libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    libc::pthread_mutex_init(m, &attr);
    libc::pthread_mutexattr_destroy(&mut attr);
}

unsafe fn init_process_shared_cond(c: *mut libc::pthread_cond_t) {
    let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
    libc::pthread_condattr_init(&mut attr);
    libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    // Match the local `Fifo`'s use of `Instant`: the timed wait must be
    // immune to wall-clock adjustments, so the condvar is bound to
    // CLOCK_MONOTONIC rather than the default CLOCK_REALTIME.
    libc::pthread_condattr_setclock(&mut attr, libc::CLOCK_MONOTONIC);
    libc::pthread_cond_init(c, &attr);
    libc::pthread_condattr_destroy(&mut attr);
}

unsafe fn lock(m: *mut libc::pthread_mutex_t) {
    libc::pthread_mutex_lock(m);
}

unsafe fn unlock(m: *mut libc::pthread_mutex_t) {
    libc::pthread_mutex_unlock(m);
}

/// Wait on `cond`/`mutex`. Returns `false` if `timeout` elapsed without
/// a wake, `true` otherwise (woken or waiting indefinitely).
unsafe fn wait(
    cond: *mut libc::pthread_cond_t,
    mutex: *mut libc::pthread_mutex_t,
    timeout: Option<Duration>,
) -> bool {
    match timeout {
        None => {
            libc::pthread_cond_wait(cond, mutex);
            true
        }
        Some(d) => {
            let mut now: libc::timespec = std::mem::zeroed();
            // The condvar was created with CLOCK_MONOTONIC (see
            // `init_process_shared_cond`); the deadline passed to
            // `pthread_cond_timedwait` must be read from the same clock.
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now);
            let mut deadline = now;
            deadline.tv_sec += d.as_secs() as libc::time_t;
            deadline.tv_nsec += d.subsec_nanos() as i64;
            if deadline.tv_nsec >= 1_000_000_000 {
                deadline.tv_sec += 1;
                deadline.tv_nsec -= 1_000_000_000;
            }
            let rc = libc::pthread_cond_timedwait(cond, mutex, &deadline);
            rc != libc::ETIMEDOUT
        }
    }
}
