//! Propagated transactions over one connection scope.
//!
//! A [`UnitOfWork`] maintains a stack of transaction frames over physical
//! connections checked out from a [`DriverProvider`]. Each `begin` pushes a
//! frame according to its [`Propagation`] mode; `commit` and `rollback`
//! operate on the top frame only. Joined frames defer the physical
//! commit/rollback decision to the frame that actually opened the
//! transaction; nested frames map to savepoints; `RequiresNew` parks the
//! whole current transaction on its own connection and runs an independent
//! one on a fresh checkout.
//!
//! # Example
//!
//! ```
//! use stratum_persistence::transaction::{Propagation, RecordingDriver, UnitOfWork};
//!
//! let mut uow = UnitOfWork::new(RecordingDriver::provider());
//! uow.begin(Propagation::Required).unwrap();
//! uow.begin(Propagation::Required).unwrap(); // joins, no second BEGIN
//! assert_eq!(uow.tran_count(), 2);
//! uow.commit().unwrap(); // inner: pops only
//! uow.commit().unwrap(); // outer: physical COMMIT
//! assert!(!uow.in_transaction());
//! ```

mod coordinator;
mod propagation;

pub use coordinator::{
    DriverProvider, RecordingDriver, RecordingProvider, TransactionDriver, UnitOfWork,
};
pub use propagation::Propagation;
