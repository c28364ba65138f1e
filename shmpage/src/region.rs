//! The shared region header and its publication protocol.
//!
//! `magic` and `version` are release-stored after the sizing block and the
//! derived layout, so any reader that has acquired a matching `magic` may
//! read the rest of the header plainly. The `state` word flips once, from
//! [`STATE_UNINITIALIZED`] to [`STATE_INITIALIZED`], when the creator is done
//! filling the application header and the page states.

use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::errors::ShmError;
use crate::layout::{MemInfo, RegionLayout};

/// Identifies this layout family.
pub(crate) const REGION_MAGIC: u32 = 0x14BF_A396;
/// Layout version; attaching to a different one fails.
pub(crate) const REGION_VERSION: u32 = 0x100;
/// Value of the shared `state` word once initialization finished.
pub(crate) const STATE_INITIALIZED: u32 = 0x6F43;
/// Initial value of the shared `state` word.
pub(crate) const STATE_UNINITIALIZED: u32 = 0;

/// First bytes of every shared region, little-endian, naturally aligned.
#[repr(C)]
pub(crate) struct RegionHeader {
    pub magic: AtomicU32,
    pub version: AtomicU32,
    pub state: AtomicU32,
    pub info: MemInfo,
    pub layout: RegionLayout,
}

pub(crate) const HEADER_SIZE: u32 = size_of::<RegionHeader>() as u32;

/// # Safety
///
/// `base` must point at a mapping of at least [`HEADER_SIZE`] bytes that
/// stays valid for `'a`.
pub(crate) unsafe fn header<'a>(base: NonNull<u8>) -> &'a RegionHeader {
    unsafe { &*(base.as_ptr() as *const RegionHeader) }
}

/// # Safety
///
/// As for [`header`]; additionally a matching `magic` must have been
/// acquired, which orders this read after the creator's writes.
pub(crate) unsafe fn read_info(base: NonNull<u8>) -> MemInfo {
    let hdr = base.as_ptr() as *const RegionHeader;
    unsafe { std::ptr::addr_of!((*hdr).info).read_volatile() }
}

/// # Safety
///
/// As for [`read_info`].
pub(crate) unsafe fn read_layout(base: NonNull<u8>) -> RegionLayout {
    let hdr = base.as_ptr() as *const RegionHeader;
    unsafe { std::ptr::addr_of!((*hdr).layout).read_volatile() }
}

/// Validates the header of an existing region and returns the full size its
/// creator published. Used by the transports for the second phase of an
/// attach.
///
/// # Safety
///
/// `base` must point at a mapping of at least [`HEADER_SIZE`] bytes.
pub(crate) unsafe fn advertised_size(base: NonNull<u8>) -> Result<u32, ShmError> {
    let hdr = unsafe { header(base) };
    let magic = hdr.magic.load(Ordering::Acquire);
    let version = hdr.version.load(Ordering::Acquire);
    if magic != REGION_MAGIC || version != REGION_VERSION {
        return Err(ShmError::CorruptedHeader(format!(
            "magic/version {magic:#010x}/{version:#x} instead of {REGION_MAGIC:#010x}/{REGION_VERSION:#x}"
        )));
    }
    let layout = unsafe { read_layout(base) };
    if layout.full_size < HEADER_SIZE {
        return Err(ShmError::CorruptedHeader(
            "advertised size smaller than the region header".into(),
        ));
    }
    Ok(layout.full_size)
}

/// State word of page `page`.
///
/// # Safety
///
/// `base` must point at a mapping of at least `layout.full_size` bytes that
/// stays valid for `'a`, with `page` inside `0..num_pages` of the `MemInfo`
/// the layout was derived from.
pub(crate) unsafe fn page_state<'a>(
    base: NonNull<u8>,
    layout: &RegionLayout,
    page: u32,
) -> &'a AtomicI32 {
    let offset = layout.first_page_start as usize
        + layout.whole_page_size as usize * page as usize
        + layout.lib_page_header_offset as usize;
    unsafe { &*(base.as_ptr().add(offset) as *const AtomicI32) }
}
