//! Image frames over the shared page exchange.
//!
//! A producer renders into pages of a [`shmpage`] region and a consumer
//! receives whole frames, each page carrying the frame's geometry in its
//! application header. The channel never blocks and never tears: the
//! producer drops frames when the consumer falls behind, and
//! [`SharedImage::receive`] always surfaces the newest pending frame,
//! releasing the older ones back to the producer.
//!
//! The page currently exposed to the consumer application is parked in an
//! application-defined page state until the next receive, so at most one
//! frame is ever pinned on the consumer side.

use std::mem::size_of;
use std::ptr::NonNull;

use log::{debug, trace, warn};

use shmpage::{MemInfo, SharedPages};
pub use shmpage::{Role, ShmError};

/// Identifies the image layer inside the region's application header.
pub const IMAGE_MAGIC: u32 = 0x41B0_D34A;
/// Image layer version.
pub const IMAGE_VERSION: u32 = 0x100;

/// Bytes per pixel of the ARGB32 frame format.
pub const BYTES_PER_PIXEL: u32 = 4;

const DEFAULT_NUM_PAGES: u32 = 2;

/// Page state of the frame currently exposed to the consumer application.
/// Data scans skip it, so it survives until the next receive.
const PAGE_HELD: u32 = 3;

/// Per-frame geometry, stored in each page's application header.
///
/// `bytes_per_line` may exceed `width * 4` for padded layouts, as long as
/// `bytes_per_line * height` fits the page.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageSetting {
    pub width: u32,
    pub height: u32,
    pub bytes_per_line: u32,
}

/// Application header of the region.
#[repr(C)]
#[derive(Clone, Copy)]
struct ImageHeader {
    magic: u32,
    version: u32,
}

/// Application page header: the frame geometry plus the producer's send
/// sequence, which lets the consumer pick the newest pending frame.
#[repr(C)]
#[derive(Clone, Copy)]
struct ImagePageHeader {
    setting: ImageSetting,
    seq: u32,
}

/// Writable frame buffer handed to the producer by
/// [`SharedImage::out_buffer`].
pub struct OutBuffer {
    pub data: NonNull<u8>,
    /// Pixel capacity of the buffer.
    pub pixels: u32,
}

/// Frame handed to the consumer; the buffer stays valid until the next
/// successful [`SharedImage::receive`].
pub struct Frame {
    pub data: NonNull<u8>,
    pub setting: ImageSetting,
}

/// One side of an image channel.
#[derive(Debug)]
pub struct SharedImage {
    pages: SharedPages,
    /// Latched once the region has been observed initialized.
    observed: bool,
    /// Whether the image magic and version matched when first observed.
    valid: bool,
    /// Producer: page claimed by `out_buffer`. Consumer: page exposed to the
    /// application.
    last_page: Option<u32>,
    next_seq: u32,
    error: String,
}

impl SharedImage {
    /// Creates or attaches a two-page image channel able to carry
    /// `num_pixels` ARGB32 pixels per frame.
    pub fn create(name: &str, num_pixels: u32, role: Role) -> Result<Self, ShmError> {
        Self::create_with(name, num_pixels, DEFAULT_NUM_PAGES, role)
    }

    /// As [`create`](Self::create) with an explicit page count. More pages
    /// let the producer run further ahead before frames start dropping.
    pub fn create_with(
        name: &str,
        num_pixels: u32,
        num_pages: u32,
        role: Role,
    ) -> Result<Self, ShmError> {
        if num_pages == 0 {
            return Err(ShmError::Parameter(
                "image channel needs at least one page".into(),
            ));
        }
        let page_size = num_pixels
            .checked_mul(BYTES_PER_PIXEL)
            .ok_or_else(|| {
                ShmError::Parameter(format!("{num_pixels} pixels exceed a u32 byte count"))
            })?;
        let info = MemInfo {
            header_size: size_of::<ImageHeader>() as u32,
            page_header_size: size_of::<ImagePageHeader>() as u32,
            page_size,
            num_pages,
            ..MemInfo::default()
        };

        let pages = SharedPages::create(name, &info, 0, role)?;
        let mut image = SharedImage {
            pages,
            observed: false,
            valid: false,
            last_page: None,
            next_seq: 1,
            error: String::new(),
        };

        if image.pages.must_initialize() {
            let header = image.pages.header()?;
            // SAFETY: the application header spans an ImageHeader; the peer
            // cannot read it before end_initialization publishes it.
            unsafe {
                (header.as_ptr() as *mut ImageHeader).write_volatile(ImageHeader {
                    magic: IMAGE_MAGIC,
                    version: IMAGE_VERSION,
                });
            }
            // Every page starts on the producer side so frames can flow
            // before the consumer shows up.
            for page in 0..num_pages {
                image.pages.init_page_producer(page)?;
            }
            image.pages.end_initialization();
            image.observed = true;
            image.valid = true;
            debug!("image channel '{name}' initialized: {num_pages} pages x {num_pixels} pixels");
        }

        Ok(image)
    }

    /// Claims the next free producer-owned page for writing.
    ///
    /// `None` means the consumer currently holds every page; that is flow
    /// control, not an error. The claimed page stays with the producer until
    /// [`send`](Self::send) publishes it; claiming again without sending
    /// simply returns the same buffer.
    pub fn out_buffer(&mut self) -> Option<OutBuffer> {
        if self.gate().is_err() {
            return None;
        }
        let page = self.pages.free_page_from(0)?;
        let data = self.pages.page_data(page).ok()?;
        self.last_page = Some(page);
        Some(OutBuffer {
            data,
            pixels: self.pages.info().page_size / BYTES_PER_PIXEL,
        })
    }

    /// Publishes the frame written into the buffer claimed by
    /// [`out_buffer`](Self::out_buffer) and wakes the consumer.
    pub fn send(&mut self, setting: &ImageSetting) -> Result<(), ShmError> {
        self.gate()?;
        let Some(page) = self.last_page else {
            return self.fail(ShmError::Parameter(
                "no output buffer held; call out_buffer first".into(),
            ));
        };
        let header = self.pages.page_header(page)?;
        // SAFETY: the app page header spans an ImagePageHeader and the page
        // is still producer-owned.
        unsafe {
            (header.as_ptr() as *mut ImagePageHeader).write_volatile(ImagePageHeader {
                setting: *setting,
                seq: self.next_seq,
            });
        }
        self.pages.send_data(page)?;
        self.last_page = None;
        self.next_seq = self.next_seq.wrapping_add(1);
        trace!(
            "frame {}x{} sent on page {page}",
            setting.width, setting.height
        );
        Ok(())
    }

    /// Returns the newest pending frame, or `None` when nothing new has
    /// arrived.
    ///
    /// Older pending frames are dropped and their pages returned to the
    /// producer, as is the page of the previously exposed frame; the
    /// producer is topped up with free pages even when no frame is pending,
    /// so it always has a buffer to write into.
    pub fn receive(&mut self) -> Option<Frame> {
        if self.gate().is_err() {
            return None;
        }
        let frame = self.newest_data_page().and_then(|page| self.expose(page));
        self.give_back_free_pages();
        frame
    }

    /// Blocks until the peer notifies or `timeout_ms` elapses. A wake is a
    /// hint: follow up with [`receive`](Self::receive) or
    /// [`out_buffer`](Self::out_buffer) and tolerate spurious wakes.
    pub fn wait_notify(&self, timeout_ms: u32) -> bool {
        self.pages.wait_notify(timeout_ms)
    }

    /// Pixel capacity of each page.
    pub fn num_pixels(&self) -> u32 {
        self.pages.info().page_size / BYTES_PER_PIXEL
    }

    /// Message recorded by the most recent failing operation.
    pub fn last_error(&self) -> String {
        if self.error.is_empty() {
            self.pages.last_error()
        } else {
            self.error.clone()
        }
    }

    /// The raw incoming wake object, for an external wait loop.
    #[cfg(windows)]
    pub fn notification_handle(&self) -> windows_sys::Win32::Foundation::HANDLE {
        self.pages.notification_handle()
    }

    /// Unlinks the OS objects behind `name` where the platform requires it.
    pub fn remove(name: &str) -> Result<(), ShmError> {
        SharedPages::remove(name)
    }

    /// Once-latched initialization check: after the region is first seen
    /// initialized, the image header is validated exactly once and the
    /// verdict cached.
    fn check_initialized(&mut self) -> bool {
        if !self.observed {
            if !self.pages.is_initialized() {
                return false;
            }
            self.observed = true;
            self.valid = self.header_valid();
            if !self.valid {
                warn!("shared region is not an image channel (image magic/version mismatch)");
            }
        }
        self.valid
    }

    fn header_valid(&self) -> bool {
        let Ok(header) = self.pages.header() else {
            return false;
        };
        // SAFETY: the application header spans an ImageHeader and is
        // immutable once the region is initialized.
        let header = unsafe { (header.as_ptr() as *const ImageHeader).read_volatile() };
        header.magic == IMAGE_MAGIC && header.version == IMAGE_VERSION
    }

    fn gate(&mut self) -> Result<(), ShmError> {
        if self.check_initialized() {
            self.error.clear();
            return Ok(());
        }
        let err = if self.observed {
            ShmError::CorruptedHeader("region is not an image channel".into())
        } else {
            ShmError::NotInitialized
        };
        self.fail(err)
    }

    fn fail<T>(&mut self, err: ShmError) -> Result<T, ShmError> {
        self.error = err.to_string();
        Err(err)
    }

    /// The pending data page with the newest send sequence, ignoring the
    /// page currently exposed to the application.
    fn newest_data_page(&self) -> Option<u32> {
        let mut newest: Option<(u32, u32)> = None;
        let mut start = 0;
        while let Some(page) = self.pages.data_page_from(start) {
            if Some(page) != self.last_page {
                let seq = self.read_page_header(page).map_or(0, |header| header.seq);
                let newer = match newest {
                    None => true,
                    Some((_, best)) => seq.wrapping_sub(best) as i32 > 0,
                };
                if newer {
                    newest = Some((page, seq));
                }
            }
            start = page + 1;
        }
        newest.map(|(page, _)| page)
    }

    /// Makes `page` the exposed frame: releases the previous one, parks the
    /// new one in the held state, and drops every other pending frame.
    fn expose(&mut self, page: u32) -> Option<Frame> {
        let header = self.read_page_header(page)?;
        let data = self.pages.page_data(page).ok()?;

        if let Some(previous) = self.last_page.take() {
            if self.pages.free_page(previous).is_err() {
                warn!("failed to release previously held page {previous}");
            }
        }
        self.last_page = Some(page);
        if self.pages.set_page_state(page, PAGE_HELD).is_err() {
            warn!("failed to park page {page} as held");
        }

        let mut start = 0;
        while let Some(other) = self.pages.data_page_from(start) {
            if Some(other) != self.last_page {
                let _ = self.pages.free_page(other);
                trace!("dropped stale frame on page {other}");
            }
            start = other + 1;
        }

        Some(Frame { data, setting: header.setting })
    }

    /// Returns spare free pages to the producer, keeping at most the held
    /// page on this side.
    fn give_back_free_pages(&mut self) {
        while self.pages.num_owned_pages() > 1 {
            match self.pages.free_page_from(0) {
                Some(page) => {
                    if self.pages.send_free(page).is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    fn read_page_header(&self, page: u32) -> Option<ImagePageHeader> {
        let header = self.pages.page_header(page).ok()?;
        // SAFETY: the app page header spans an ImagePageHeader.
        Some(unsafe { (header.as_ptr() as *const ImagePageHeader).read_volatile() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    static NEXT_CHANNEL: AtomicUsize = AtomicUsize::new(0);

    struct TestName(String);

    impl TestName {
        fn new(tag: &str) -> Self {
            let n = NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed);
            TestName(format!("i{}p{}-{tag}", n, std::process::id()))
        }

        fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl Drop for TestName {
        fn drop(&mut self) {
            let _ = SharedImage::remove(&self.0);
        }
    }

    unsafe fn fill(ptr: NonNull<u8>, value: u8, len: usize) {
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), value, len) };
    }

    unsafe fn read(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), out.as_mut_ptr(), len) };
        out
    }

    fn send_filled(producer: &mut SharedImage, value: u8, setting: &ImageSetting) {
        let out = producer.out_buffer().expect("a free page is available");
        unsafe { fill(out.data, value, 16) };
        producer.send(setting).unwrap();
    }

    #[test]
    fn frame_round_trip() {
        let name = TestName::new("hello");
        let pixels = 640 * 480;
        let mut producer = SharedImage::create(name.as_str(), pixels, Role::Producer).unwrap();
        let mut consumer = SharedImage::create(name.as_str(), pixels, Role::Consumer).unwrap();

        let out = producer.out_buffer().expect("fresh channel has a free page");
        assert_eq!(out.pixels, pixels);
        let message = b"Hello, world!";
        unsafe {
            std::ptr::copy_nonoverlapping(message.as_ptr(), out.data.as_ptr(), message.len());
        }
        let setting = ImageSetting { width: 640, height: 480, bytes_per_line: 2560 };
        producer.send(&setting).unwrap();

        let frame = consumer.receive().expect("one frame is pending");
        assert_eq!(frame.setting, setting);
        assert_eq!(unsafe { read(frame.data, message.len()) }, message);
    }

    #[test]
    fn send_without_buffer_fails() {
        let name = TestName::new("nobuffer");
        let mut producer = SharedImage::create(name.as_str(), 64, Role::Producer).unwrap();
        let err = producer.send(&ImageSetting::default()).unwrap_err();
        assert!(matches!(err, ShmError::Parameter(_)));
        assert!(producer.last_error().contains("out_buffer"));
    }

    #[test]
    fn out_buffer_is_stable_until_send() {
        let name = TestName::new("stable");
        let mut producer = SharedImage::create(name.as_str(), 64, Role::Producer).unwrap();
        let first = producer.out_buffer().unwrap();
        let second = producer.out_buffer().unwrap();
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn receive_keeps_newest_and_drops_older() {
        let name = TestName::new("newest");
        let mut producer =
            SharedImage::create_with(name.as_str(), 64, 3, Role::Producer).unwrap();
        let mut consumer =
            SharedImage::create_with(name.as_str(), 64, 3, Role::Consumer).unwrap();
        let setting = ImageSetting { width: 2, height: 2, bytes_per_line: 8 };

        for value in [0xAA, 0xBB, 0xCC] {
            send_filled(&mut producer, value, &setting);
        }

        // The first receive surfaces the third frame, not the first.
        let frame = consumer.receive().expect("frames are pending");
        assert_eq!(unsafe { read(frame.data, 16) }, vec![0xCC; 16]);

        // Both dropped pages went back to the producer; the consumer only
        // keeps the held frame.
        assert_eq!(producer.pages.num_owned_pages(), 2);
        assert_eq!(consumer.pages.num_owned_pages(), 1);
        assert!(producer.out_buffer().is_some());
    }

    #[test]
    fn held_page_is_released_on_next_receive() {
        let name = TestName::new("held");
        let mut producer = SharedImage::create(name.as_str(), 64, Role::Producer).unwrap();
        let mut consumer = SharedImage::create(name.as_str(), 64, Role::Consumer).unwrap();
        let setting = ImageSetting { width: 4, height: 4, bytes_per_line: 16 };

        send_filled(&mut producer, 0x11, &setting);
        let first = consumer.receive().expect("first frame");
        assert_eq!(unsafe { read(first.data, 16) }, vec![0x11; 16]);
        // The held page is parked out of the data scans.
        assert_eq!(consumer.pages.first_page_with(PAGE_HELD, 0), Some(0));
        assert_eq!(consumer.receive().map(|_| ()), None);

        send_filled(&mut producer, 0x22, &setting);
        let second = consumer.receive().expect("second frame");
        assert_eq!(unsafe { read(second.data, 16) }, vec![0x22; 16]);

        // The old held page went back to the producer; only one page stays
        // on the consumer side.
        assert_eq!(consumer.pages.num_owned_pages(), 1);
        assert_eq!(producer.pages.num_owned_pages(), 1);
        assert_eq!(consumer.pages.first_page_with(PAGE_HELD, 0), Some(1));
    }

    #[test]
    fn producer_runs_dry_when_consumer_is_gone() {
        let name = TestName::new("dry");
        let mut producer = SharedImage::create(name.as_str(), 64, Role::Producer).unwrap();
        let consumer = SharedImage::create(name.as_str(), 64, Role::Consumer).unwrap();
        drop(consumer);
        let setting = ImageSetting { width: 1, height: 1, bytes_per_line: 4 };

        send_filled(&mut producer, 1, &setting);
        send_filled(&mut producer, 2, &setting);

        // Every page drifted to the silent peer; nothing blocks, nothing
        // panics.
        assert!(producer.out_buffer().is_none());
        assert!(producer.send(&setting).is_err());
    }

    #[test]
    fn consumer_wakes_on_sent_frame() {
        let name = TestName::new("wake");
        let mut producer = SharedImage::create(name.as_str(), 64, Role::Producer).unwrap();
        let mut consumer = SharedImage::create(name.as_str(), 64, Role::Consumer).unwrap();

        let waiter = thread::spawn(move || {
            let mut rounds = 0;
            loop {
                if let Some(frame) = consumer.receive() {
                    return frame.setting;
                }
                assert!(rounds < 100, "no frame within the deadline");
                rounds += 1;
                consumer.wait_notify(500);
            }
        });

        thread::sleep(Duration::from_millis(30));
        let setting = ImageSetting { width: 8, height: 8, bytes_per_line: 32 };
        send_filled(&mut producer, 0x3C, &setting);
        assert_eq!(waiter.join().unwrap(), setting);
    }

    #[test]
    fn rejects_a_region_that_is_not_an_image_channel() {
        let name = TestName::new("foreign");
        // Same page geometry as the image layer would use, but the app
        // header never gets the image magic.
        let info = MemInfo {
            header_size: size_of::<ImageHeader>() as u32,
            page_header_size: size_of::<ImagePageHeader>() as u32,
            page_size: 64 * 4,
            num_pages: 2,
            ..MemInfo::default()
        };
        let mut owner = SharedPages::create(name.as_str(), &info, 0, Role::Producer).unwrap();
        owner.end_initialization();

        let mut consumer = SharedImage::create(name.as_str(), 64, Role::Consumer).unwrap();
        assert!(consumer.receive().is_none());
        assert!(consumer.last_error().contains("not an image channel"));
        // The verdict is latched: still failing on the next call.
        assert!(consumer.receive().is_none());
    }

    #[test]
    fn zero_pages_is_rejected() {
        let name = TestName::new("zeropages");
        let err = SharedImage::create_with(name.as_str(), 64, 0, Role::Producer).unwrap_err();
        assert!(matches!(err, ShmError::Parameter(_)));
    }
}
