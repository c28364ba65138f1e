//! Unix backend: POSIX shared memory plus named semaphores.
//!
//! The region is a `shm_open` object mapped through `memmap2`; freshness
//! comes from an `O_CREAT | O_EXCL` probe. The wake objects are named
//! semaphores driven auto-reset style: `notify` posts only when no wake is
//! already pending, so repeated notifies coalesce, and a waiter consumes one
//! pending wake per return.
//!
//! POSIX objects persist until unlinked; [`Transport::remove`] reclaims the
//! three names once both sides are done with a region.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::ptr::NonNull;

use log::debug;
use memmap2::{MmapOptions, MmapRaw};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use super::{Attach, ObjectKind, Role, derive_name};
use crate::errors::ShmError;
use crate::region;

const OBJECT_MODE: u32 = 0o644;

fn sys_from_errno(call: &'static str, errno: nix::errno::Errno) -> ShmError {
    ShmError::sys(call, io::Error::from_raw_os_error(errno as i32))
}

/// Leading-slash object name as POSIX wants it.
fn posix_name(derived: &str) -> Result<CString, ShmError> {
    CString::new(format!("/{derived}"))
        .map_err(|_| ShmError::Parameter("derived name contains NUL".into()))
}

fn open_sem(derived: &str) -> Result<*mut libc::sem_t, ShmError> {
    let name = posix_name(derived)?;
    let sem = unsafe {
        libc::sem_open(
            name.as_ptr(),
            libc::O_CREAT,
            OBJECT_MODE as libc::c_uint,
            0 as libc::c_uint,
        )
    };
    if sem == libc::SEM_FAILED {
        return Err(ShmError::sys("sem_open", io::Error::last_os_error()));
    }
    Ok(sem)
}

/// Incoming/outgoing semaphore pair, closed together.
#[derive(Debug)]
struct WakePair {
    incoming: *mut libc::sem_t,
    outgoing: *mut libc::sem_t,
}

impl Drop for WakePair {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.incoming);
            libc::sem_close(self.outgoing);
        }
    }
}

#[derive(Debug)]
pub(crate) struct Transport {
    map: MmapRaw,
    wake: WakePair,
}

// The raw semaphore pointers and the mapping are only touched through the
// methods below; the caller serializes use of a handle.
unsafe impl Send for Transport {}
unsafe impl Sync for Transport {}

impl Transport {
    /// Opens or creates the region `name` and its wake objects.
    ///
    /// An existing region is attached in two phases: the header is mapped
    /// and validated first, then the view is redone at the full size the
    /// creator published. A fresh region is sized to `requested_bytes`.
    pub fn create_or_attach(
        name: &str,
        requested_bytes: u32,
        role: Role,
    ) -> Result<Attach, ShmError> {
        let wake_a = open_sem(&derive_name(name, ObjectKind::WakeA)?)?;
        let wake_b = match open_sem(&derive_name(name, ObjectKind::WakeB)?) {
            Ok(sem) => sem,
            Err(err) => {
                unsafe { libc::sem_close(wake_a) };
                return Err(err);
            }
        };
        let wake = match role {
            Role::Producer => WakePair { incoming: wake_a, outgoing: wake_b },
            Role::Consumer => WakePair { incoming: wake_b, outgoing: wake_a },
        };

        let shm = posix_name(&derive_name(name, ObjectKind::Region)?)?;
        let requested = requested_bytes.max(region::HEADER_SIZE);
        let (map, fresh) = match shm_open(
            shm.as_c_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(OBJECT_MODE),
        ) {
            Ok(fd) => {
                let file = File::from(fd);
                file.set_len(u64::from(requested))
                    .map_err(|e| ShmError::sys("ftruncate", e))?;
                let map = MmapOptions::new()
                    .len(requested as usize)
                    .map_raw(&file)
                    .map_err(|e| ShmError::sys("mmap", e))?;
                debug!("created region {shm:?}, {requested} bytes");
                (map, true)
            }
            Err(nix::errno::Errno::EEXIST) => (Self::attach_existing(&shm)?, false),
            Err(errno) => return Err(sys_from_errno("shm_open", errno)),
        };

        Ok(Attach { transport: Transport { map, wake }, fresh })
    }

    fn attach_existing(shm: &CString) -> Result<MmapRaw, ShmError> {
        let fd = shm_open(shm.as_c_str(), OFlag::O_RDWR, Mode::from_bits_truncate(OBJECT_MODE))
            .map_err(|errno| sys_from_errno("shm_open", errno))?;
        let file = File::from(fd);
        let len = file
            .metadata()
            .map_err(|e| ShmError::sys("fstat", e))?
            .len();
        if len < u64::from(region::HEADER_SIZE) {
            return Err(ShmError::CorruptedHeader(
                "existing region smaller than the region header".into(),
            ));
        }

        // Phase one: map just the header and learn the true size.
        let probe = MmapOptions::new()
            .len(region::HEADER_SIZE as usize)
            .map_raw(&file)
            .map_err(|e| ShmError::sys("mmap", e))?;
        // SAFETY: a successful mapping is non-null and spans the header.
        let base = unsafe { NonNull::new_unchecked(probe.as_mut_ptr()) };
        let full = unsafe { region::advertised_size(base) }?;
        drop(probe);

        if u64::from(full) > len {
            return Err(ShmError::CorruptedHeader(format!(
                "advertised size {full} exceeds the {len}-byte backing object"
            )));
        }

        // Phase two: the view the handle keeps.
        let map = MmapOptions::new()
            .len(full as usize)
            .map_raw(&file)
            .map_err(|e| ShmError::sys("mmap", e))?;
        debug!("attached to region {shm:?}, {full} bytes");
        Ok(map)
    }

    pub fn base(&self) -> NonNull<u8> {
        // SAFETY: a successful mapping is never at the null page.
        unsafe { NonNull::new_unchecked(self.map.as_mut_ptr()) }
    }

    pub fn len(&self) -> u32 {
        self.map.len() as u32
    }

    /// Wakes the peer. Pending wakes coalesce: posting onto an already
    /// signaled semaphore is skipped.
    pub fn notify(&self) {
        let mut pending = 0;
        let known = unsafe { libc::sem_getvalue(self.wake.outgoing, &mut pending) } == 0;
        if !known || pending < 1 {
            unsafe { libc::sem_post(self.wake.outgoing) };
        }
    }

    /// Blocks until the peer notifies or `timeout_ms` elapses. Returns true
    /// when woken by a notification.
    ///
    /// TODO: sem_timedwait takes a CLOCK_REALTIME deadline, so a wall-clock
    /// jump can stretch or cut the timeout; switch to sem_clockwait with
    /// CLOCK_MONOTONIC once glibc 2.30 can be assumed.
    pub fn wait_notify(&self, timeout_ms: u32) -> bool {
        let mut deadline = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut deadline) } != 0 {
            return false;
        }
        deadline.tv_sec += (timeout_ms / 1000) as libc::time_t;
        deadline.tv_nsec += ((timeout_ms % 1000) as libc::c_long) * 1_000_000;
        if deadline.tv_nsec >= 1_000_000_000 {
            deadline.tv_sec += 1;
            deadline.tv_nsec -= 1_000_000_000;
        }
        loop {
            if unsafe { libc::sem_timedwait(self.wake.incoming, &deadline) } == 0 {
                return true;
            }
            match io::Error::last_os_error().raw_os_error() {
                Some(libc::EINTR) => continue,
                _ => return false,
            }
        }
    }

    /// Unlinks the OS objects behind `name`. Attached handles keep working;
    /// the names become available for a new region. Missing objects are not
    /// an error.
    pub fn remove(name: &str) -> Result<(), ShmError> {
        for kind in [ObjectKind::WakeA, ObjectKind::WakeB] {
            let sem = posix_name(&derive_name(name, kind)?)?;
            unsafe { libc::sem_unlink(sem.as_ptr()) };
        }
        let shm = posix_name(&derive_name(name, ObjectKind::Region)?)?;
        match shm_unlink(shm.as_c_str()) {
            Ok(()) | Err(nix::errno::Errno::ENOENT) => Ok(()),
            Err(errno) => Err(sys_from_errno("shm_unlink", errno)),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        debug!("detaching region view at {:p}", self.map.as_ptr());
    }
}
