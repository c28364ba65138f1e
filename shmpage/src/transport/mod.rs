//! Host-OS transport: one named byte region plus a pair of named wake
//! objects.
//!
//! Each backend exposes the same surface: create-or-attach with freshness
//! reporting, a base pointer and length for the mapped region, a coalescing
//! `notify`, and a timed `wait_notify`. Wakes are edge hints only; protocol
//! state lives in the region itself.

use crate::errors::ShmError;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::Transport;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::Transport;

/// Which side of the exchange this process plays.
///
/// The two participants of a region must pick opposite roles: the role
/// selects both the sign of the pages this process may own and which of the
/// two wake objects is incoming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Producer => Role::Consumer,
            Role::Consumer => Role::Producer,
        }
    }
}

/// Result of [`Transport::create_or_attach`].
pub(crate) struct Attach {
    pub transport: Transport,
    /// True when this process created the region and must initialize it.
    pub fresh: bool,
}

/// Longest accepted UTF-8 region name, in bytes.
pub const NAME_MAX: usize = 64;
/// Longest derived OS object name, in encoded units.
const OS_NAME_MAX: usize = 100;

const NAME_TAG: &str = "shd";

/// The three OS objects derived from one region name.
#[derive(Clone, Copy)]
enum ObjectKind {
    /// Wake object signaled towards the producer.
    WakeA,
    /// Wake object signaled towards the consumer.
    WakeB,
    /// The shared-memory region itself.
    Region,
}

impl ObjectKind {
    fn suffix(self) -> char {
        match self {
            ObjectKind::WakeA => 'A',
            ObjectKind::WakeB => 'B',
            ObjectKind::Region => 'D',
        }
    }
}

/// Builds the OS object name for `name`, validating it first.
fn derive_name(name: &str, kind: ObjectKind) -> Result<String, ShmError> {
    if name.is_empty() {
        return Err(ShmError::Parameter("region name is empty".into()));
    }
    if name.len() > NAME_MAX {
        return Err(ShmError::Parameter(format!(
            "region name exceeds {NAME_MAX} bytes"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(ShmError::Parameter(
            "region name contains a path separator or NUL".into(),
        ));
    }
    let derived = format!("{NAME_TAG}{name}{}", kind.suffix());
    if derived.encode_utf16().count() > OS_NAME_MAX {
        return Err(ShmError::Parameter(format!(
            "derived object name exceeds {OS_NAME_MAX} characters"
        )));
    }
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_get_tag_and_suffix() {
        assert_eq!(derive_name("T", ObjectKind::WakeA).unwrap(), "shdTA");
        assert_eq!(derive_name("T", ObjectKind::WakeB).unwrap(), "shdTB");
        assert_eq!(derive_name("T", ObjectKind::Region).unwrap(), "shdTD");
    }

    #[test]
    fn oversized_name_is_rejected() {
        let name = "x".repeat(NAME_MAX + 1);
        assert!(matches!(
            derive_name(&name, ObjectKind::Region),
            Err(ShmError::Parameter(_))
        ));
    }

    #[test]
    fn separators_are_rejected() {
        for name in ["a/b", "a\\b", "a\0b"] {
            assert!(matches!(
                derive_name(name, ObjectKind::Region),
                Err(ShmError::Parameter(_))
            ));
        }
    }

    #[test]
    fn roles_oppose() {
        assert_eq!(Role::Producer.opposite(), Role::Consumer);
        assert_eq!(Role::Consumer.opposite(), Role::Producer);
    }
}
