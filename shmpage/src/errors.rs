use std::io;
use thiserror::Error;

/// All errors that can come out of the page exchange.
///
/// "No page available" is not among them: scans report it as `None` so that
/// an empty ring never looks like a fault.
#[derive(Debug, Error)]
pub enum ShmError {
    /// A caller-supplied argument was rejected before touching the OS.
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// The requested sizes and alignments do not describe a mappable region,
    /// or the stored layout disagrees with its sizing block.
    #[error("invalid layout: {0}")]
    Layout(String),

    /// An OS primitive failed.
    #[error("{call} failed: {source}")]
    Sys {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    /// The named region exists but its header is not one of ours.
    #[error("corrupted region header: {0}")]
    CorruptedHeader(String),

    /// Operation issued before the region reached the initialized state.
    #[error("shared region not initialized")]
    NotInitialized,

    /// Initialization-phase operation issued by a process that did not
    /// create the region.
    #[error("shared region is not being initialized by this process")]
    NotInitializer,

    /// Page index out of range.
    #[error("page {0} out of range")]
    InvalidPage(u32),

    /// The page state word carries the peer's sign.
    #[error("page {0} not owned by this process")]
    NotOwned(u32),
}

impl ShmError {
    pub(crate) fn sys(call: &'static str, source: io::Error) -> Self {
        ShmError::Sys { call, source }
    }
}
