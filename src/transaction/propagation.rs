//! Transaction propagation modes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a unit of work relates to an already-open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Join the open transaction, or open one if none exists. The
    /// commit/rollback decision belongs to the outermost frame.
    #[default]
    Required,

    /// Join the open transaction; fail if none exists.
    Mandatory,

    /// Run inside a savepoint of the open transaction, so a rollback undoes
    /// only the work since this frame began. Behaves like [`Required`]
    /// when no transaction is open.
    ///
    /// [`Required`]: Propagation::Required
    Nested,

    /// Suspend any open transaction (parked, not aborted), run an
    /// independent transaction on a fresh connection checkout, and resume
    /// the parked one on completion.
    RequiresNew,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Required => write!(f, "required"),
            Propagation::Mandatory => write!(f, "mandatory"),
            Propagation::Nested => write!(f, "nested"),
            Propagation::RequiresNew => write!(f, "requires-new"),
        }
    }
}
