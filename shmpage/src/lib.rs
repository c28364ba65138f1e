//! Zero-copy page exchange between two processes on one host.
//!
//! A *producer* and a *consumer* attach to a named shared-memory region and
//! trade fixed-size pages through per-page atomic state words. The sign of a
//! state word says which side owns the page, its magnitude what the page
//! currently means (free, data, or an application-defined state), so a single
//! release store hands a filled page over. A pair of named wake objects
//! carries hints that page states changed; the state words stay authoritative.
//!
//! [`SharedPages`] is the handle both sides hold. The first process to create
//! the region initializes the application header and the per-page ownership,
//! then publishes the region with [`SharedPages::end_initialization`]; a
//! process that attached to an existing region waits until
//! [`SharedPages::is_initialized`] reports true.

mod errors;
mod layout;
mod pager;
mod region;
mod transport;

pub use errors::ShmError;
pub use layout::{DEFAULT_ALIGN, MemInfo};
pub use pager::{PAGE_DATA, PAGE_FREE, SharedPages};
pub use transport::{NAME_MAX, Role};
