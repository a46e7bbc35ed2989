//! Connection configuration and the connection registry.
//!
//! The registry is loaded once at process startup from structured settings
//! and is immutable afterwards: every thread shares it read-only without
//! locking. Loading performs three jobs:
//!
//! 1. **Selection** — disabled entries are dropped, the entry matching the
//!    configured main-database id is moved to position 0 so downstream code
//!    can always treat element 0 as the primary, and the entry matching the
//!    reserved log id is diverted to a dedicated slot outside the business
//!    list.
//! 2. **Resolution** — connection strings get engine-specific post
//!    processing: SQLite filenames become absolute paths inside a managed
//!    data directory, and client-server engines read local override files
//!    in preference to the configured value so production credentials never
//!    live in the settings file.
//! 3. **Validation** — a missing log connection or an unmatched main id is
//!    fatal; the process must not start.

mod registry;
mod resolve;
mod settings;

pub use registry::{ConnectionDescriptor, ConnectionRegistry, LOG_CONNECTION_ID};
pub use resolve::{DATA_DIR_NAME, ROOT_MARKER_FILE};
pub use settings::{ConnectionEntry, DatabaseKind, DatabaseSettings};
