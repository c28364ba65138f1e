//! Windows backend: a named file mapping plus two named auto-reset events.
//!
//! The section is backed by the paging file; whichever process calls
//! `CreateFileMappingW` first creates it, later callers see
//! `ERROR_ALREADY_EXISTS` and attach. An existing section is attached in two
//! phases: map the whole view, learn the true size from the region header,
//! then remap at that size. Events auto-reset, so repeated `SetEvent` calls
//! between waits coalesce into one wake.

use std::io;
use std::ptr::{self, NonNull};

use log::debug;

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_BASIC_INFORMATION,
    MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, PAGE_READWRITE, UnmapViewOfFile, VirtualQuery,
};
use windows_sys::Win32::System::Threading::{CreateEventW, SetEvent, WaitForSingleObject};

use super::{Attach, ObjectKind, Role, derive_name};
use crate::errors::ShmError;
use crate::region;

fn wide(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(std::iter::once(0)).collect()
}

fn create_event(derived: &str) -> Result<HANDLE, ShmError> {
    let name = wide(derived);
    // Auto-reset, initially unsignaled.
    let handle = unsafe { CreateEventW(ptr::null(), 0, 0, name.as_ptr()) };
    if handle.is_null() {
        return Err(ShmError::sys("CreateEventW", io::Error::last_os_error()));
    }
    Ok(handle)
}

/// Incoming/outgoing event pair, closed together.
#[derive(Debug)]
struct EventPair {
    incoming: HANDLE,
    outgoing: HANDLE,
}

impl Drop for EventPair {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.incoming);
            CloseHandle(self.outgoing);
        }
    }
}

/// Section handle plus its mapped view.
#[derive(Debug)]
struct View {
    handle: HANDLE,
    addr: NonNull<u8>,
    len: u32,
}

impl View {
    fn map(handle: HANDLE, len: u32) -> Result<View, ShmError> {
        let view = unsafe {
            MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len as usize)
        };
        if view.Value.is_null() {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(ShmError::sys("MapViewOfFile", err));
        }
        // SAFETY: non-null checked above.
        let addr = unsafe { NonNull::new_unchecked(view.Value as *mut u8) };
        Ok(View { handle, addr, len })
    }
}

impl Drop for View {
    fn drop(&mut self) {
        unsafe {
            UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.addr.as_ptr() as _,
            });
            CloseHandle(self.handle);
        }
    }
}

#[derive(Debug)]
pub(crate) struct Transport {
    view: View,
    events: EventPair,
}

// Handles and the mapped view are only touched through the methods below;
// the caller serializes use of a handle.
unsafe impl Send for Transport {}
unsafe impl Sync for Transport {}

impl Transport {
    pub fn create_or_attach(
        name: &str,
        requested_bytes: u32,
        role: Role,
    ) -> Result<Attach, ShmError> {
        let event_a = create_event(&derive_name(name, ObjectKind::WakeA)?)?;
        let event_b = match create_event(&derive_name(name, ObjectKind::WakeB)?) {
            Ok(handle) => handle,
            Err(err) => {
                unsafe { CloseHandle(event_a) };
                return Err(err);
            }
        };
        let events = match role {
            Role::Producer => EventPair { incoming: event_a, outgoing: event_b },
            Role::Consumer => EventPair { incoming: event_b, outgoing: event_a },
        };

        let section = wide(&derive_name(name, ObjectKind::Region)?);
        let requested = requested_bytes.max(region::HEADER_SIZE);
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                0,
                requested,
                section.as_ptr(),
            )
        };
        if handle.is_null() {
            return Err(ShmError::sys("CreateFileMappingW", io::Error::last_os_error()));
        }
        let fresh = unsafe { GetLastError() } != ERROR_ALREADY_EXISTS;

        let view = if fresh {
            debug!("created section, {requested} bytes");
            View::map(handle, requested)?
        } else {
            Self::attach_existing(handle, &section)?
        };

        Ok(Attach { transport: Transport { view, events }, fresh })
    }

    fn attach_existing(handle: HANDLE, section: &[u16]) -> Result<View, ShmError> {
        // Phase one: map the whole existing view and learn the true size.
        let probe = View::map(handle, 0)?;
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        let queried = unsafe {
            VirtualQuery(
                probe.addr.as_ptr() as *const _,
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if queried != std::mem::size_of::<MEMORY_BASIC_INFORMATION>() {
            return Err(ShmError::sys("VirtualQuery", io::Error::last_os_error()));
        }
        if info.RegionSize < region::HEADER_SIZE as usize {
            return Err(ShmError::CorruptedHeader(
                "existing region smaller than the region header".into(),
            ));
        }
        let full = unsafe { region::advertised_size(probe.addr) }?;
        drop(probe);

        // Phase two: reopen and map at the advertised size.
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                0,
                full,
                section.as_ptr(),
            )
        };
        if handle.is_null() {
            return Err(ShmError::sys("CreateFileMappingW", io::Error::last_os_error()));
        }
        if unsafe { GetLastError() } != ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(ShmError::CorruptedHeader(
                "region disappeared between the two attach phases".into(),
            ));
        }
        let view = View::map(handle, full)?;
        debug!("attached to section, {full} bytes");
        Ok(view)
    }

    pub fn base(&self) -> NonNull<u8> {
        self.view.addr
    }

    pub fn len(&self) -> u32 {
        self.view.len
    }

    pub fn notify(&self) {
        unsafe { SetEvent(self.events.outgoing) };
    }

    pub fn wait_notify(&self, timeout_ms: u32) -> bool {
        unsafe { WaitForSingleObject(self.events.incoming, timeout_ms) == WAIT_OBJECT_0 }
    }

    /// The raw incoming event, for integration with an external wait loop.
    pub fn notification_handle(&self) -> HANDLE {
        self.events.incoming
    }

    /// Nothing to unlink on Windows: the kernel reclaims named objects when
    /// the last handle closes.
    pub fn remove(_name: &str) -> Result<(), ShmError> {
        Ok(())
    }
}
