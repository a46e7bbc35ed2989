//! The unit-of-work coordinator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{StorageResult, TransactionError};

use super::propagation::Propagation;

/// Physical transaction operations over one checked-out connection.
///
/// Implementations wrap a single database connection. A driver is checked
/// out when a frame actually opens a transaction and returned (dropped)
/// when that transaction finishes.
pub trait TransactionDriver {
    /// Opens a transaction.
    fn begin(&mut self) -> StorageResult<()>;
    /// Commits the open transaction.
    fn commit(&mut self) -> StorageResult<()>;
    /// Rolls back the open transaction.
    fn rollback(&mut self) -> StorageResult<()>;
    /// Creates a named savepoint inside the open transaction.
    fn savepoint(&mut self, name: &str) -> StorageResult<()>;
    /// Releases a named savepoint, keeping its work.
    fn release_savepoint(&mut self, name: &str) -> StorageResult<()>;
    /// Rolls back to a named savepoint, undoing work since it was created.
    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()>;
}

/// Source of fresh driver checkouts.
///
/// `Required`/`Nested` check out one driver for the outermost transaction;
/// every `RequiresNew` frame checks out another so the suspended
/// transaction's connection is parked untouched.
pub trait DriverProvider {
    /// The driver type produced by this provider.
    type Driver: TransactionDriver;

    /// Checks out a connection wrapped in a driver.
    fn checkout(&self) -> StorageResult<Self::Driver>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// Opened the physical transaction; bottom of its stack.
    Owner,
    /// Joined an existing transaction; pops without physical effect.
    Joined,
}

#[derive(Debug)]
enum Frame {
    Plain { kind: FrameKind },
    Savepoint { name: String },
}

/// One physical transaction plus the frames stacked on it.
struct TxStack<D> {
    driver: D,
    frames: Vec<Frame>,
    rollback_only: bool,
}

/// Coordinator for propagated transactions over one connection scope.
///
/// The coordinator keeps a stack of physical transactions; the last entry
/// is active and the rest are suspended (`RequiresNew`). Within each
/// physical transaction, frames track joins and savepoints. `commit` and
/// `rollback` always address the top frame of the active transaction.
///
/// Failure discipline: when a joined frame observes an error it calls
/// [`rollback`](Self::rollback) (marking the transaction rollback-only) and
/// propagates the error; the owning frame's eventual `rollback` — or a
/// `commit` on a rollback-only transaction — performs the physical
/// rollback.
pub struct UnitOfWork<P: DriverProvider> {
    provider: P,
    stacks: Vec<TxStack<P::Driver>>,
    savepoint_seq: u64,
}

impl<P: DriverProvider> UnitOfWork<P> {
    /// Creates a coordinator that checks connections out of `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            stacks: Vec::new(),
            savepoint_seq: 0,
        }
    }

    /// Opens a new frame with the requested propagation mode.
    ///
    /// # Errors
    ///
    /// [`TransactionError::NoActiveTransaction`] when `Mandatory` is
    /// requested outside any transaction.
    pub fn begin(&mut self, propagation: Propagation) -> StorageResult<()> {
        match propagation {
            Propagation::Required => {
                if let Some(stack) = self.stacks.last_mut() {
                    stack.frames.push(Frame::Plain {
                        kind: FrameKind::Joined,
                    });
                } else {
                    self.open_transaction()?;
                }
            }
            Propagation::Mandatory => {
                let stack = self.stacks.last_mut().ok_or_else(|| {
                    TransactionError::NoActiveTransaction {
                        requested: "mandatory propagation".to_string(),
                    }
                })?;
                stack.frames.push(Frame::Plain {
                    kind: FrameKind::Joined,
                });
            }
            Propagation::Nested => {
                if self.stacks.is_empty() {
                    // nothing to nest under
                    self.open_transaction()?;
                } else {
                    self.savepoint_seq += 1;
                    let name = format!("uow_sp_{}", self.savepoint_seq);
                    let stack = self.stacks.last_mut().expect("active transaction");
                    stack.driver.savepoint(&name)?;
                    stack.frames.push(Frame::Savepoint { name });
                }
            }
            Propagation::RequiresNew => {
                if !self.stacks.is_empty() {
                    debug!("suspending current transaction");
                }
                self.open_transaction()?;
            }
        }
        Ok(())
    }

    /// Commits the top frame.
    ///
    /// Joined frames pop without physical effect; savepoint frames release
    /// their savepoint; the owning frame issues the physical commit, or a
    /// physical rollback plus [`TransactionError::RolledBack`] if an inner
    /// frame marked the transaction rollback-only.
    pub fn commit(&mut self) -> StorageResult<()> {
        let stack = self.stacks.last_mut().ok_or_else(no_active("commit"))?;
        let frame = stack.frames.pop().expect("frame on active transaction");
        match frame {
            Frame::Plain {
                kind: FrameKind::Joined,
            } => Ok(()),
            Frame::Savepoint { name } => stack.driver.release_savepoint(&name),
            Frame::Plain {
                kind: FrameKind::Owner,
            } => {
                let mut stack = self.stacks.pop().expect("active transaction");
                if stack.rollback_only {
                    stack.driver.rollback()?;
                    debug!("rollback-only transaction rolled back at commit");
                    Err(TransactionError::RolledBack {
                        reason: "marked rollback-only by an inner frame".to_string(),
                    }
                    .into())
                } else {
                    stack.driver.commit()?;
                    debug!("transaction committed");
                    Ok(())
                }
            }
        }
    }

    /// Rolls back the top frame.
    ///
    /// Joined frames mark the enclosing transaction rollback-only and pop;
    /// savepoint frames undo work since their savepoint; the owning frame
    /// issues the physical rollback and resumes any suspended transaction.
    pub fn rollback(&mut self) -> StorageResult<()> {
        let stack = self.stacks.last_mut().ok_or_else(no_active("rollback"))?;
        let frame = stack.frames.pop().expect("frame on active transaction");
        match frame {
            Frame::Plain {
                kind: FrameKind::Joined,
            } => {
                stack.rollback_only = true;
                Ok(())
            }
            Frame::Savepoint { name } => {
                stack.driver.rollback_to_savepoint(&name)?;
                stack.driver.release_savepoint(&name)
            }
            Frame::Plain {
                kind: FrameKind::Owner,
            } => {
                let mut stack = self.stacks.pop().expect("active transaction");
                stack.driver.rollback()?;
                debug!("transaction rolled back");
                Ok(())
            }
        }
    }

    /// Runs `f` in a frame with the given propagation: commit on `Ok`,
    /// rollback on `Err`.
    pub fn with_transaction<R>(
        &mut self,
        propagation: Propagation,
        f: impl FnOnce(&mut Self) -> StorageResult<R>,
    ) -> StorageResult<R> {
        self.begin(propagation)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                // the original error outranks a rollback failure
                let _ = self.rollback();
                Err(err)
            }
        }
    }

    /// Number of currently open frames across active and suspended
    /// transactions.
    pub fn tran_count(&self) -> usize {
        self.stacks.iter().map(|s| s.frames.len()).sum()
    }

    /// Returns `true` while any transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.stacks.is_empty()
    }

    /// The driver of the active transaction, if one is open.
    ///
    /// Queries issued inside a transaction must run on this driver's
    /// connection, not on a fresh checkout.
    pub fn active_driver_mut(&mut self) -> Option<&mut P::Driver> {
        self.stacks.last_mut().map(|s| &mut s.driver)
    }

    fn open_transaction(&mut self) -> StorageResult<()> {
        let mut driver = self.provider.checkout()?;
        driver.begin()?;
        debug!("transaction opened");
        self.stacks.push(TxStack {
            driver,
            frames: vec![Frame::Plain {
                kind: FrameKind::Owner,
            }],
            rollback_only: false,
        });
        Ok(())
    }
}

fn no_active(requested: &str) -> impl FnOnce() -> TransactionError {
    let requested = requested.to_string();
    move || TransactionError::NoActiveTransaction { requested }
}

/// Driver double that records operations instead of touching a database.
///
/// Useful for asserting propagation behavior in tests and documentation
/// examples; each checkout gets its own connection id so suspend/resume
/// sequences are visible in the recorded log.
#[derive(Debug)]
pub struct RecordingDriver {
    id: usize,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingDriver {
    /// Creates a provider whose checkouts share one recorded log.
    pub fn provider() -> RecordingProvider {
        RecordingProvider {
            log: Arc::new(Mutex::new(Vec::new())),
            checkouts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn record(&mut self, op: impl AsRef<str>) -> StorageResult<()> {
        self.log.lock().push(format!("c{}: {}", self.id, op.as_ref()));
        Ok(())
    }
}

impl TransactionDriver for RecordingDriver {
    fn begin(&mut self) -> StorageResult<()> {
        self.record("begin")
    }
    fn commit(&mut self) -> StorageResult<()> {
        self.record("commit")
    }
    fn rollback(&mut self) -> StorageResult<()> {
        self.record("rollback")
    }
    fn savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.record(format!("savepoint {}", name))
    }
    fn release_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.record(format!("release {}", name))
    }
    fn rollback_to_savepoint(&mut self, name: &str) -> StorageResult<()> {
        self.record(format!("rollback to {}", name))
    }
}

/// Provider of [`RecordingDriver`] checkouts.
#[derive(Debug, Clone)]
pub struct RecordingProvider {
    log: Arc<Mutex<Vec<String>>>,
    checkouts: Arc<AtomicUsize>,
}

impl RecordingProvider {
    /// Snapshot of every recorded operation, in order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Number of connections checked out so far.
    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }
}

impl DriverProvider for RecordingProvider {
    type Driver = RecordingDriver;

    fn checkout(&self) -> StorageResult<RecordingDriver> {
        let id = self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingDriver {
            id,
            log: Arc::clone(&self.log),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn test_required_joins_existing() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        uow.begin(Propagation::Required).unwrap();
        uow.begin(Propagation::Required).unwrap();
        assert_eq!(uow.tran_count(), 2);

        uow.commit().unwrap();
        assert_eq!(uow.tran_count(), 1);
        uow.commit().unwrap();
        assert!(!uow.in_transaction());

        // one physical transaction only
        assert_eq!(provider.log(), vec!["c0: begin", "c0: commit"]);
        assert_eq!(provider.checkouts(), 1);
    }

    #[test]
    fn test_mandatory_requires_open_transaction() {
        let mut uow = UnitOfWork::new(RecordingDriver::provider());
        let err = uow.begin(Propagation::Mandatory).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Transaction(TransactionError::NoActiveTransaction { .. })
        ));

        uow.begin(Propagation::Required).unwrap();
        uow.begin(Propagation::Mandatory).unwrap();
        assert_eq!(uow.tran_count(), 2);
    }

    #[test]
    fn test_inner_rollback_poisons_outer_commit() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        uow.begin(Propagation::Required).unwrap();
        uow.begin(Propagation::Required).unwrap();

        // inner frame observes an error
        uow.rollback().unwrap();

        // outer commit must physically roll back everything
        let err = uow.commit().unwrap_err();
        assert!(matches!(
            err,
            StorageError::Transaction(TransactionError::RolledBack { .. })
        ));
        assert_eq!(provider.log(), vec!["c0: begin", "c0: rollback"]);
    }

    #[test]
    fn test_nested_uses_savepoints() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        uow.begin(Propagation::Required).unwrap();
        uow.begin(Propagation::Nested).unwrap();
        assert_eq!(uow.tran_count(), 2);

        // nested rollback undoes only the savepoint fragment
        uow.rollback().unwrap();
        uow.commit().unwrap();

        assert_eq!(
            provider.log(),
            vec![
                "c0: begin",
                "c0: savepoint uow_sp_1",
                "c0: rollback to uow_sp_1",
                "c0: release uow_sp_1",
                "c0: commit",
            ]
        );
    }

    #[test]
    fn test_nested_without_transaction_behaves_like_required() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        uow.begin(Propagation::Nested).unwrap();
        uow.commit().unwrap();
        assert_eq!(provider.log(), vec!["c0: begin", "c0: commit"]);
    }

    #[test]
    fn test_requires_new_suspends_and_resumes() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        uow.begin(Propagation::Required).unwrap();
        uow.begin(Propagation::RequiresNew).unwrap();
        assert_eq!(provider.checkouts(), 2, "independent connection checkout");

        // independent transaction commits while the outer stays open
        uow.commit().unwrap();
        assert!(uow.in_transaction());
        assert_eq!(uow.tran_count(), 1);

        // the outer transaction was never touched
        uow.commit().unwrap();
        assert_eq!(
            provider.log(),
            vec!["c0: begin", "c1: begin", "c1: commit", "c0: commit"]
        );
    }

    #[test]
    fn test_requires_new_rollback_leaves_outer_intact() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        uow.begin(Propagation::Required).unwrap();
        uow.begin(Propagation::RequiresNew).unwrap();
        uow.rollback().unwrap();

        // the outer transaction can still commit
        uow.commit().unwrap();
        assert_eq!(
            provider.log(),
            vec!["c0: begin", "c1: begin", "c1: rollback", "c0: commit"]
        );
    }

    #[test]
    fn test_requires_new_without_transaction() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        uow.begin(Propagation::RequiresNew).unwrap();
        uow.commit().unwrap();
        assert_eq!(provider.log(), vec!["c0: begin", "c0: commit"]);
    }

    #[test]
    fn test_commit_without_begin_fails() {
        let mut uow = UnitOfWork::new(RecordingDriver::provider());
        assert!(uow.commit().is_err());
        assert!(uow.rollback().is_err());
    }

    #[test]
    fn test_with_transaction_commits_on_ok() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        let value = uow
            .with_transaction(Propagation::Required, |_uow| Ok(42))
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(provider.log(), vec!["c0: begin", "c0: commit"]);
    }

    #[test]
    fn test_with_transaction_rolls_back_on_err() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        let result: StorageResult<()> = uow.with_transaction(Propagation::Required, |_uow| {
            Err(TransactionError::Driver {
                message: "boom".to_string(),
            }
            .into())
        });
        assert!(result.is_err());
        assert_eq!(provider.log(), vec!["c0: begin", "c0: rollback"]);
    }

    #[test]
    fn test_with_transaction_nested_error_propagates() {
        let provider = RecordingDriver::provider();
        let mut uow = UnitOfWork::new(provider.clone());

        // outer Required, inner Required fails: all work rolls back
        let result: StorageResult<()> = uow.with_transaction(Propagation::Required, |uow| {
            uow.with_transaction(Propagation::Required, |_uow| {
                Err(TransactionError::Driver {
                    message: "inner failure".to_string(),
                }
                .into())
            })
        });
        assert!(result.is_err());
        assert!(!uow.in_transaction());
        assert_eq!(provider.log(), vec!["c0: begin", "c0: rollback"]);
    }
}
