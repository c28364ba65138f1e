//! Region sizing and the offsets derived from it.
//!
//! A [`MemInfo`] describes what the application wants (header and page sizes
//! plus their alignments); [`calculate`] turns it into the concrete offsets
//! stored in the region header. All arithmetic is checked so an oversized
//! request fails cleanly instead of wrapping.

use crate::errors::ShmError;

/// Alignment applied where a [`MemInfo`] field is zero.
pub const DEFAULT_ALIGN: u32 = 16;

/// Size of the per-page library header (one `i32` state word).
pub(crate) const PAGE_STATE_SIZE: u32 = 4;

/// Sizes and alignments of the shared region's variable parts.
///
/// Alignments must be powers of two, or zero for the 16-byte default. The
/// copy stored in the region header has the zeros resolved, so both sides
/// agree on the alignments actually used. Seven little-endian `u32`s on the
/// wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub header_align: u32,
    pub header_size: u32,
    pub page_header_align: u32,
    pub page_header_size: u32,
    pub page_align: u32,
    pub page_size: u32,
    pub num_pages: u32,
}

/// Offsets derived from a [`MemInfo`]; seven `u32`s following it in the
/// region header. Page `n` starts at `first_page_start + whole_page_size * n`
/// and the per-page offsets are relative to that.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RegionLayout {
    pub header_start: u32,
    pub first_page_start: u32,
    pub whole_page_size: u32,
    pub lib_page_header_offset: u32,
    pub app_page_header_offset: u32,
    pub data_offset: u32,
    pub full_size: u32,
}

pub(crate) fn resolve(align: u32) -> u32 {
    if align == 0 { DEFAULT_ALIGN } else { align }
}

/// Copy of `info` with zero alignments replaced by the default; this is the
/// form written into the region header.
pub(crate) fn resolve_info(info: &MemInfo) -> MemInfo {
    MemInfo {
        header_align: resolve(info.header_align),
        page_header_align: resolve(info.page_header_align),
        page_align: resolve(info.page_align),
        ..*info
    }
}

fn check_align(what: &str, align: u32) -> Result<(), ShmError> {
    if align != 0 && !align.is_power_of_two() {
        return Err(ShmError::Parameter(format!(
            "{what} alignment {align} is not a power of two"
        )));
    }
    Ok(())
}

fn overflow() -> ShmError {
    ShmError::Layout("region size overflows a u32".into())
}

fn align_up(value: u32, align: u32) -> Result<u32, ShmError> {
    let align = resolve(align);
    Ok(value.checked_add(align - 1).ok_or_else(overflow)? & !(align - 1))
}

/// Derives the region layout for `info`.
///
/// The first page is aligned to the largest of the page alignments (and the
/// default), which keeps every per-page offset valid as an absolute
/// alignment too; the page stride is rounded up to the same boundary.
pub(crate) fn calculate(info: &MemInfo) -> Result<RegionLayout, ShmError> {
    check_align("header", info.header_align)?;
    check_align("page header", info.page_header_align)?;
    check_align("page", info.page_align)?;
    if info.num_pages == 0 {
        return Err(ShmError::Parameter("page count must be at least one".into()));
    }

    let max_align = DEFAULT_ALIGN
        .max(resolve(info.page_header_align))
        .max(resolve(info.page_align));

    let header_start = align_up(crate::region::HEADER_SIZE, info.header_align)?;
    let first_page_start = align_up(
        header_start.checked_add(info.header_size).ok_or_else(overflow)?,
        max_align,
    )?;
    let app_page_header_offset = align_up(PAGE_STATE_SIZE, info.page_header_align)?;
    let data_offset = align_up(
        app_page_header_offset
            .checked_add(info.page_header_size)
            .ok_or_else(overflow)?,
        info.page_align,
    )?;
    let whole_page_size = align_up(
        data_offset.checked_add(info.page_size).ok_or_else(overflow)?,
        max_align,
    )?;
    let full_size = whole_page_size
        .checked_mul(info.num_pages)
        .and_then(|pages| pages.checked_add(first_page_start))
        .ok_or_else(overflow)?;

    Ok(RegionLayout {
        header_start,
        first_page_start,
        whole_page_size,
        lib_page_header_offset: 0,
        app_page_header_offset,
        data_offset,
        full_size,
    })
}
