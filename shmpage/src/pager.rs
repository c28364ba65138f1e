//! The page exchange: layout publication, the initialization handshake, and
//! the per-page ownership protocol.
//!
//! Every page carries one `i32` state word in shared memory. The sign is the
//! owner (positive producer, negative consumer), the magnitude the meaning:
//! 1 free, 2 data, 3 and up application-defined. Ownership and meaning flip
//! together in a single release store, so the peer that acquires the new
//! value also sees every earlier write to the page. A handle is meant for
//! one logical thread; cross-process concurrency goes exclusively through
//! the state words and the wake objects.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

use log::{debug, trace};

use crate::errors::ShmError;
use crate::layout::{self, MemInfo, RegionLayout};
use crate::region::{self, REGION_MAGIC, REGION_VERSION, STATE_INITIALIZED, STATE_UNINITIALIZED};
use crate::transport::{Attach, Role, Transport};

/// Magnitude of a free page state.
pub const PAGE_FREE: u32 = 1;
/// Magnitude of a data page state.
pub const PAGE_DATA: u32 = 2;

fn is_free_state(state: i32) -> bool {
    state == 1 || state == -1
}

fn is_data_state(state: i32) -> bool {
    state > 1 || state < -1
}

/// A two-process page exchange over one named shared region.
///
/// Within a process the handle must be used from one thread at a time; it is
/// `Send` so it can be handed to the thread that drives it.
#[derive(Debug)]
pub struct SharedPages {
    transport: Transport,
    role: Role,
    need_initialize: bool,
    info: MemInfo,
    layout: RegionLayout,
    local: Box<[u8]>,
    last_error: RefCell<String>,
}

impl SharedPages {
    /// Creates or attaches to the region `name`.
    ///
    /// For a fresh region the resolved `info` and its derived layout are
    /// written into the header and every page starts free on the producer
    /// side; the caller then fills the application header, assigns page
    /// ownership with [`init_page_producer`](Self::init_page_producer) /
    /// [`init_page_consumer`](Self::init_page_consumer), and publishes with
    /// [`end_initialization`](Self::end_initialization). When the region
    /// already existed, `info` only sizes the first mapping attempt and the
    /// effective values come from the region header.
    ///
    /// The trailing `local_bytes` of the handle are an opaque process-local
    /// scratch area, reachable through [`local`](Self::local).
    pub fn create(
        name: &str,
        info: &MemInfo,
        local_bytes: u32,
        role: Role,
    ) -> Result<Self, ShmError> {
        let layout = layout::calculate(info)?;
        let Attach { transport, fresh } = Transport::create_or_attach(name, layout.full_size, role)?;
        let base = transport.base();

        let (info, layout) = if fresh {
            let effective = layout::resolve_info(info);
            // SAFETY: the fresh mapping spans `full_size` bytes, and no peer
            // holds a validated view before `magic` is published below.
            unsafe {
                let hdr = base.as_ptr() as *mut region::RegionHeader;
                (*hdr).state.store(STATE_UNINITIALIZED, Ordering::Relaxed);
                std::ptr::addr_of_mut!((*hdr).info).write_volatile(effective);
                std::ptr::addr_of_mut!((*hdr).layout).write_volatile(layout);
                for page in 0..effective.num_pages {
                    region::page_state(base, &layout, page)
                        .store(PAGE_FREE as i32, Ordering::Relaxed);
                }
                (*hdr).version.store(REGION_VERSION, Ordering::Release);
                (*hdr).magic.store(REGION_MAGIC, Ordering::Release);
            }
            debug!(
                "created region '{name}': {} pages of {} bytes",
                effective.num_pages, effective.page_size
            );
            (effective, layout)
        } else {
            // SAFETY: the transport validated magic and version, which the
            // creator release-stored after info and layout.
            let info = unsafe { region::read_info(base) };
            let layout = unsafe { region::read_layout(base) };
            let recomputed = layout::calculate(&info).map_err(|_| {
                ShmError::CorruptedHeader("stored info does not describe a valid layout".into())
            })?;
            if recomputed != layout {
                return Err(ShmError::Layout(
                    "stored layout disagrees with its sizing block".into(),
                ));
            }
            if layout.full_size > transport.len() {
                return Err(ShmError::Layout(
                    "stored layout exceeds the mapped region".into(),
                ));
            }
            debug!(
                "attached to region '{name}': {} pages of {} bytes",
                info.num_pages, info.page_size
            );
            (info, layout)
        };

        Ok(SharedPages {
            transport,
            role,
            need_initialize: fresh,
            info,
            layout,
            local: vec![0u8; local_bytes as usize].into_boxed_slice(),
            last_error: RefCell::new(String::new()),
        })
    }

    /// True while this process is expected to initialize the region.
    pub fn must_initialize(&self) -> bool {
        self.need_initialize
    }

    /// True once some process has published the region.
    pub fn is_initialized(&self) -> bool {
        self.region_header().state.load(Ordering::Acquire) == STATE_INITIALIZED
    }

    /// Publishes the region and wakes the peer. Only the initializer's first
    /// call does anything.
    pub fn end_initialization(&mut self) {
        if self.need_initialize {
            self.need_initialize = false;
            self.region_header()
                .state
                .store(STATE_INITIALIZED, Ordering::Release);
            self.transport.notify();
            debug!("region initialization published");
        }
    }

    /// Assigns page `page` to the producer side during initialization.
    pub fn init_page_producer(&mut self, page: u32) -> Result<(), ShmError> {
        self.init_page(page, PAGE_FREE as i32)
    }

    /// Assigns page `page` to the consumer side during initialization.
    pub fn init_page_consumer(&mut self, page: u32) -> Result<(), ShmError> {
        self.init_page(page, -(PAGE_FREE as i32))
    }

    fn init_page(&mut self, page: u32, state: i32) -> Result<(), ShmError> {
        if !self.need_initialize {
            return self.fail(ShmError::NotInitializer);
        }
        self.check_page(page)?;
        // Publication order is handled by end_initialization.
        self.page_state(page).store(state, Ordering::Relaxed);
        Ok(())
    }

    /// Effective sizes and alignments of the region.
    pub fn info(&self) -> &MemInfo {
        &self.info
    }

    pub fn num_pages(&self) -> u32 {
        self.info.num_pages
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The application header, `info().header_size` bytes.
    pub fn header(&self) -> Result<NonNull<u8>, ShmError> {
        self.check_usable()?;
        // SAFETY: header_start + header_size fit inside full_size by
        // construction of the layout.
        Ok(unsafe {
            NonNull::new_unchecked(
                self.transport
                    .base()
                    .as_ptr()
                    .add(self.layout.header_start as usize),
            )
        })
    }

    /// Process-local scratch area reserved at creation.
    pub fn local(&self) -> &[u8] {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut [u8] {
        &mut self.local
    }

    /// The application page header of `page`, `info().page_header_size`
    /// bytes. Writable only while this process owns the page.
    pub fn page_header(&self, page: u32) -> Result<NonNull<u8>, ShmError> {
        self.check_usable()?;
        self.check_page(page)?;
        Ok(self.page_ptr(page, self.layout.app_page_header_offset))
    }

    /// The payload of `page`, `info().page_size` bytes. Writable only while
    /// this process owns the page.
    pub fn page_data(&self, page: u32) -> Result<NonNull<u8>, ShmError> {
        self.check_usable()?;
        self.check_page(page)?;
        Ok(self.page_ptr(page, self.layout.data_offset))
    }

    /// First page at `start` or later that is free and owned by this
    /// process.
    pub fn free_page_from(&self, start: u32) -> Option<u32> {
        self.scan(start, is_free_state)
    }

    /// First page at `start` or later that the peer sent to this process
    /// (any data state, including application-defined ones).
    pub fn data_page_from(&self, start: u32) -> Option<u32> {
        self.scan(start, is_data_state)
    }

    /// First page at `start` or later owned by this process with
    /// `|state| == state`.
    pub fn first_page_with(&self, state: u32, start: u32) -> Option<u32> {
        let wanted = state as i32;
        self.scan(start, move |current| current == wanted || current == -wanted)
    }

    /// Number of pages whose state word carries this process's sign.
    pub fn num_owned_pages(&self) -> u32 {
        if self.check_initialized().is_err() {
            return 0;
        }
        (0..self.info.num_pages)
            .filter(|&page| self.owns(self.page_state(page).load(Ordering::Acquire)))
            .count() as u32
    }

    /// Sets an owned page to `|state| == state` (1 free, 2 data, 3 and up
    /// application-defined), keeping the ownership sign. Setting the state a
    /// page already has is a no-op.
    pub fn set_page_state(&mut self, page: u32, state: u32) -> Result<(), ShmError> {
        if state == 0 || state > i32::MAX as u32 {
            return self.fail(ShmError::Parameter(format!(
                "page state {state} outside 1..=i32::MAX"
            )));
        }
        self.transfer(page, state, self.role)
    }

    /// Returns an owned page to its free state, keeping ownership.
    pub fn free_page(&mut self, page: u32) -> Result<(), ShmError> {
        self.transfer(page, PAGE_FREE, self.role)
    }

    /// Hands an owned page over to the peer as data and wakes it.
    pub fn send_data(&mut self, page: u32) -> Result<(), ShmError> {
        self.transfer(page, PAGE_DATA, self.role.opposite())?;
        self.transport.notify();
        trace!("page {page} sent as data");
        Ok(())
    }

    /// Hands an owned page over to the peer as a free page and wakes it.
    pub fn send_free(&mut self, page: u32) -> Result<(), ShmError> {
        self.transfer(page, PAGE_FREE, self.role.opposite())?;
        self.transport.notify();
        trace!("page {page} sent back as free");
        Ok(())
    }

    /// Blocks until the peer notifies or `timeout_ms` elapses. Wakes are
    /// hints: callers re-check page states after waking and tolerate
    /// spurious returns.
    pub fn wait_notify(&self, timeout_ms: u32) -> bool {
        self.transport.wait_notify(timeout_ms)
    }

    /// Wakes the peer without transferring a page.
    pub fn notify(&self) {
        self.transport.notify();
    }

    /// The raw incoming wake object, for an external wait loop.
    #[cfg(windows)]
    pub fn notification_handle(&self) -> windows_sys::Win32::Foundation::HANDLE {
        self.transport.notification_handle()
    }

    /// Message recorded by the most recent failing operation on this handle.
    pub fn last_error(&self) -> String {
        self.last_error.borrow().clone()
    }

    /// Unlinks the OS objects behind `name` where the platform requires it
    /// (POSIX); live handles keep working. No-op on Windows.
    pub fn remove(name: &str) -> Result<(), ShmError> {
        Transport::remove(name)
    }

    fn region_header(&self) -> &region::RegionHeader {
        // SAFETY: the mapping spans at least the header for the lifetime of
        // the transport.
        unsafe { region::header(self.transport.base()) }
    }

    fn page_state(&self, page: u32) -> &AtomicI32 {
        // SAFETY: callers bounds-check `page` against the cached layout.
        unsafe { region::page_state(self.transport.base(), &self.layout, page) }
    }

    fn page_ptr(&self, page: u32, offset: u32) -> NonNull<u8> {
        let offset = self.layout.first_page_start as usize
            + self.layout.whole_page_size as usize * page as usize
            + offset as usize;
        // SAFETY: in range for a bounds-checked page by layout construction.
        unsafe { NonNull::new_unchecked(self.transport.base().as_ptr().add(offset)) }
    }

    fn owns(&self, state: i32) -> bool {
        match self.role {
            Role::Producer => state > 0,
            Role::Consumer => state < 0,
        }
    }

    fn scan(&self, start: u32, matches: impl Fn(i32) -> bool) -> Option<u32> {
        if self.check_initialized().is_err() {
            return None;
        }
        (start..self.info.num_pages).find(|&page| {
            let state = self.page_state(page).load(Ordering::Acquire);
            matches(state) && self.owns(state)
        })
    }

    fn transfer(&mut self, page: u32, magnitude: u32, new_owner: Role) -> Result<(), ShmError> {
        self.check_initialized()?;
        self.check_page(page)?;
        let current = self.page_state(page).load(Ordering::Acquire);
        if !self.owns(current) {
            return self.fail(ShmError::NotOwned(page));
        }
        let signed = match new_owner {
            Role::Producer => magnitude as i32,
            Role::Consumer => -(magnitude as i32),
        };
        // Release: payload and app-header writes travel with the flip.
        self.page_state(page).store(signed, Ordering::Release);
        Ok(())
    }

    fn check_initialized(&self) -> Result<(), ShmError> {
        if self.is_initialized() {
            Ok(())
        } else {
            self.fail(ShmError::NotInitialized)
        }
    }

    /// Accessors also work for the initializer while it fills the region.
    fn check_usable(&self) -> Result<(), ShmError> {
        if self.need_initialize || self.is_initialized() {
            Ok(())
        } else {
            self.fail(ShmError::NotInitialized)
        }
    }

    fn check_page(&self, page: u32) -> Result<(), ShmError> {
        if page < self.info.num_pages {
            Ok(())
        } else {
            self.fail(ShmError::InvalidPage(page))
        }
    }

    fn fail<T>(&self, err: ShmError) -> Result<T, ShmError> {
        let mut message = self.last_error.borrow_mut();
        message.clear();
        let _ = write!(message, "{err}");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NAME_MAX;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    static NEXT_REGION: AtomicUsize = AtomicUsize::new(0);

    /// Unique region name that unlinks its OS objects when dropped.
    struct TestName(String);

    impl TestName {
        fn new(tag: &str) -> Self {
            let n = NEXT_REGION.fetch_add(1, Ordering::Relaxed);
            TestName(format!("t{}p{}-{tag}", n, std::process::id()))
        }

        fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl Drop for TestName {
        fn drop(&mut self) {
            let _ = SharedPages::remove(&self.0);
        }
    }

    fn small_info(num_pages: u32) -> MemInfo {
        MemInfo {
            header_size: 8,
            page_header_size: 12,
            page_size: 256,
            num_pages,
            ..MemInfo::default()
        }
    }

    fn pair(name: &TestName, num_pages: u32) -> (SharedPages, SharedPages) {
        let mut producer =
            SharedPages::create(name.as_str(), &small_info(num_pages), 0, Role::Producer).unwrap();
        assert!(producer.must_initialize());
        producer.end_initialization();
        let consumer =
            SharedPages::create(name.as_str(), &small_info(num_pages), 0, Role::Consumer).unwrap();
        assert!(!consumer.must_initialize());
        (producer, consumer)
    }

    unsafe fn write_bytes(ptr: NonNull<u8>, bytes: &[u8]) {
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
    }

    unsafe fn read_bytes(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), out.as_mut_ptr(), len) };
        out
    }

    #[test]
    fn handshake_gates_operations() {
        let name = TestName::new("handshake");
        let mut producer =
            SharedPages::create(name.as_str(), &small_info(2), 0, Role::Producer).unwrap();
        assert!(producer.must_initialize());
        assert!(!producer.is_initialized());

        let consumer =
            SharedPages::create(name.as_str(), &small_info(2), 0, Role::Consumer).unwrap();
        assert!(!consumer.must_initialize());
        assert!(!consumer.is_initialized());

        // Everything but accessors is rejected until publication.
        assert_eq!(consumer.free_page_from(0), None);
        assert!(consumer.last_error().contains("not initialized"));
        assert_eq!(consumer.num_owned_pages(), 0);

        producer.end_initialization();
        assert!(producer.is_initialized());
        assert!(consumer.is_initialized());

        // Pages default to the producer side.
        assert_eq!(producer.free_page_from(0), Some(0));
        assert_eq!(consumer.free_page_from(0), None);
    }

    #[test]
    fn end_initialization_is_idempotent() {
        let name = TestName::new("endinit");
        let (mut producer, _consumer) = pair(&name, 2);
        producer.end_initialization();
        producer.end_initialization();
        assert!(producer.is_initialized());
        assert!(!producer.must_initialize());
    }

    #[test]
    fn init_pages_pick_sides() {
        let name = TestName::new("sides");
        let mut producer =
            SharedPages::create(name.as_str(), &small_info(4), 0, Role::Producer).unwrap();
        producer.init_page_consumer(0).unwrap();
        producer.init_page_consumer(1).unwrap();
        producer.init_page_producer(2).unwrap();
        producer.init_page_producer(3).unwrap();
        assert!(matches!(
            producer.init_page_producer(4),
            Err(ShmError::InvalidPage(4))
        ));
        producer.end_initialization();

        let consumer =
            SharedPages::create(name.as_str(), &small_info(4), 0, Role::Consumer).unwrap();
        assert_eq!(producer.num_owned_pages(), 2);
        assert_eq!(consumer.num_owned_pages(), 2);
        assert_eq!(consumer.free_page_from(0), Some(0));
        assert_eq!(producer.free_page_from(0), Some(2));

        // And only the initializer may assign sides.
        let mut consumer = consumer;
        assert!(matches!(
            consumer.init_page_producer(0),
            Err(ShmError::NotInitializer)
        ));
    }

    #[test]
    fn payload_round_trip_and_ownership() {
        let name = TestName::new("roundtrip");
        let (mut producer, mut consumer) = pair(&name, 2);

        let page = producer.free_page_from(0).unwrap();
        unsafe { write_bytes(producer.page_data(page).unwrap(), b"Hello, world!") };
        unsafe { write_bytes(producer.page_header(page).unwrap(), &7u32.to_le_bytes()) };
        producer.send_data(page).unwrap();

        // The sender no longer owns the page.
        assert!(matches!(
            producer.send_data(page),
            Err(ShmError::NotOwned(p)) if p == page
        ));
        assert!(producer.last_error().contains("not owned"));

        let got = consumer.data_page_from(0).unwrap();
        assert_eq!(got, page);
        let payload = unsafe { read_bytes(consumer.page_data(got).unwrap(), 13) };
        assert_eq!(&payload, b"Hello, world!");
        let header = unsafe { read_bytes(consumer.page_header(got).unwrap(), 4) };
        assert_eq!(header, 7u32.to_le_bytes());

        // Return it and watch it come back free.
        consumer.send_free(got).unwrap();
        assert_eq!(consumer.data_page_from(0), None);
        assert_eq!(producer.free_page_from(0), Some(page));
    }

    #[test]
    fn ownership_total_is_conserved() {
        let name = TestName::new("conserve");
        let (mut producer, mut consumer) = pair(&name, 3);
        let total = |p: &SharedPages, c: &SharedPages| p.num_owned_pages() + c.num_owned_pages();

        assert_eq!(total(&producer, &consumer), 3);
        producer.send_data(0).unwrap();
        assert_eq!(total(&producer, &consumer), 3);
        producer.send_free(1).unwrap();
        assert_eq!(total(&producer, &consumer), 3);
        consumer.free_page(0).unwrap();
        consumer.send_free(0).unwrap();
        assert_eq!(total(&producer, &consumer), 3);
    }

    #[test]
    fn scans_respect_bounds_and_start() {
        let name = TestName::new("scanbounds");
        let (mut producer, consumer) = pair(&name, 2);

        assert_eq!(producer.free_page_from(2), None);
        assert_eq!(producer.free_page_from(1), Some(1));
        assert_eq!(consumer.data_page_from(0), None);

        producer.set_page_state(0, 5).unwrap();
        assert_eq!(producer.first_page_with(5, 0), Some(0));
        assert_eq!(producer.first_page_with(5, 1), None);
        // Custom states still count as data pages for the owner.
        assert_eq!(producer.data_page_from(0), Some(0));
    }

    #[test]
    fn set_page_state_validates_and_is_idempotent() {
        let name = TestName::new("setstate");
        let (mut producer, _consumer) = pair(&name, 2);

        assert!(matches!(
            producer.set_page_state(0, 0),
            Err(ShmError::Parameter(_))
        ));
        assert!(matches!(
            producer.set_page_state(9, 1),
            Err(ShmError::InvalidPage(9))
        ));

        producer.set_page_state(0, 3).unwrap();
        producer.set_page_state(0, 3).unwrap();
        assert_eq!(producer.first_page_with(3, 0), Some(0));
        producer.free_page(0).unwrap();
        assert_eq!(producer.free_page_from(0), Some(0));
    }

    #[test]
    fn attacher_waits_for_publication() {
        let name = TestName::new("race");
        let mut creator =
            SharedPages::create(name.as_str(), &small_info(2), 0, Role::Producer).unwrap();

        let attach_name = name.0.clone();
        let waiter = thread::spawn(move || {
            let attacher =
                SharedPages::create(&attach_name, &small_info(2), 0, Role::Consumer).unwrap();
            assert!(!attacher.must_initialize());
            if !attacher.is_initialized() {
                assert!(attacher.wait_notify(5000));
            }
            assert!(attacher.is_initialized());
        });

        // Let the attacher reach its wait, then publish.
        thread::sleep(Duration::from_millis(50));
        creator.end_initialization();
        waiter.join().unwrap();
    }

    #[test]
    fn attach_discovers_true_size() {
        let name = TestName::new("twophase");
        let big = MemInfo {
            header_size: 64,
            page_header_size: 16,
            page_size: 4096,
            num_pages: 3,
            ..MemInfo::default()
        };
        let mut creator = SharedPages::create(name.as_str(), &big, 0, Role::Producer).unwrap();
        creator.end_initialization();

        // The attacher asks for a much smaller region; the header wins.
        let attacher =
            SharedPages::create(name.as_str(), &small_info(1), 0, Role::Consumer).unwrap();
        assert_eq!(attacher.info(), creator.info());
        assert_eq!(attacher.num_pages(), 3);

        // The remapped view really spans the last page.
        let last = big.num_pages - 1;
        unsafe { write_bytes(creator.page_data(last).unwrap(), b"tail") };
        creator.send_data(last).unwrap();
        let mut attacher = attacher;
        let got = attacher.data_page_from(0).unwrap();
        assert_eq!(got, last);
        assert_eq!(
            unsafe { read_bytes(attacher.page_data(got).unwrap(), 4) },
            b"tail"
        );
        attacher.send_free(got).unwrap();
    }

    #[test]
    fn corrupted_magic_fails_attach() {
        let name = TestName::new("corrupt");
        let (producer, _consumer) = pair(&name, 2);
        producer
            .region_header()
            .magic
            .store(0xDEAD_BEEF, Ordering::Release);

        let err = SharedPages::create(name.as_str(), &small_info(2), 0, Role::Consumer)
            .expect_err("attach must reject a foreign magic");
        assert!(matches!(err, ShmError::CorruptedHeader(_)));
    }

    #[test]
    fn oversized_name_is_rejected() {
        let name = "x".repeat(NAME_MAX + 1);
        let err = SharedPages::create(&name, &small_info(2), 0, Role::Producer)
            .expect_err("name too long");
        assert!(matches!(err, ShmError::Parameter(_)));
    }

    #[test]
    fn non_default_alignment_round_trip() {
        let name = TestName::new("align64");
        let info = MemInfo {
            header_size: 8,
            page_header_size: 12,
            page_align: 64,
            page_size: 256,
            num_pages: 2,
            ..MemInfo::default()
        };
        let mut producer = SharedPages::create(name.as_str(), &info, 0, Role::Producer).unwrap();
        producer.end_initialization();
        assert_eq!(producer.layout.data_offset % 64, 0);
        assert_eq!(producer.info().page_align, 64);

        let mut consumer = SharedPages::create(name.as_str(), &info, 0, Role::Consumer).unwrap();
        unsafe { write_bytes(producer.page_data(1).unwrap(), &[0x5A; 64]) };
        producer.send_data(1).unwrap();
        let got = consumer.data_page_from(0).unwrap();
        assert_eq!(got, 1);
        assert_eq!(
            unsafe { read_bytes(consumer.page_data(got).unwrap(), 64) },
            vec![0x5A; 64]
        );
        consumer.send_free(got).unwrap();
    }

    #[test]
    fn survivor_drains_without_peer() {
        let name = TestName::new("peerless");
        let (mut producer, consumer) = pair(&name, 2);
        drop(consumer);

        // Sends still succeed: the flip is just a store.
        producer.send_data(0).unwrap();
        producer.send_data(1).unwrap();

        // All pages drifted to the dead side; the producer sees none and
        // nothing blocks.
        assert_eq!(producer.free_page_from(0), None);
        assert_eq!(producer.num_owned_pages(), 0);
        assert!(!producer.wait_notify(10));
    }

    #[test]
    fn local_scratch_is_private() {
        let name = TestName::new("scratch");
        let mut producer =
            SharedPages::create(name.as_str(), &small_info(2), 32, Role::Producer).unwrap();
        assert_eq!(producer.local().len(), 32);
        producer.local_mut()[..4].copy_from_slice(b"mine");
        assert_eq!(&producer.local()[..4], b"mine");

        let consumer =
            SharedPages::create(name.as_str(), &small_info(2), 32, Role::Consumer).unwrap();
        assert_eq!(consumer.local(), &[0u8; 32]);
    }

    #[test]
    fn header_accessor_reaches_the_shared_header() {
        let name = TestName::new("appheader");
        let (producer, consumer) = pair(&name, 2);
        unsafe { write_bytes(producer.header().unwrap(), &[0xA5; 8]) };
        assert_eq!(unsafe { read_bytes(consumer.header().unwrap(), 8) }, vec![0xA5; 8]);
    }
}
