use std::ops::{Deref, DerefMut};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::Session;
use crate::types::{GraphError, Result};

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Statements run inside the transaction.
    Active,
    /// Changes were made permanent.
    Committed,
    /// Changes were discarded.
    RolledBack,
}

/// A database transaction scoped to one session.
///
/// Every load, save and delete issued through the transaction (it
/// dereferences to [`Session`]) runs inside the driver transaction until
/// [`Transaction::commit`] or [`Transaction::rollback`].
///
/// # Cache consistency
///
/// The session cache is not transactional. After a rollback, cached
/// properties, adjacency and ids assigned by the rolled-back writes are
/// stale. Call [`Session::reload`] on the affected roots to resynchronize;
/// reload removes from the cache anything that no longer exists.
///
/// # Dropping
///
/// A transaction dropped while still active is rolled back and a warning is
/// logged.
///
/// # Example
///
/// ```rust
/// use penumbra::{Depth, MemoryDriver, NodeSchema, FieldType, Object, Registry, Session};
///
/// let mut registry = Registry::new();
/// registry.register_node(NodeSchema::new("Person").property("name", FieldType::String))?;
/// let mut session = Session::new(MemoryDriver::new(), registry);
///
/// let alice = Object::new("Person").with_property("name", "Alice").into_handle();
/// let mut tx = session.begin_transaction()?;
/// tx.save_depth(&alice, Depth::Bounded(0))?;
/// tx.commit()?;
/// assert!(alice.id().is_persisted());
/// # Ok::<(), penumbra::GraphError>(())
/// ```
#[derive(Debug)]
pub struct Transaction<'s> {
    session: &'s mut Session,
    state: TxState,
    started: Instant,
}

impl<'s> Transaction<'s> {
    fn new(session: &'s mut Session) -> Result<Self> {
        if session.in_transaction {
            return Err(GraphError::Consistency(
                "a transaction is already open on this session".into(),
            ));
        }
        session.driver.begin()?;
        session.in_transaction = true;
        debug!("session.transaction.begin");
        Ok(Self {
            session,
            state: TxState::Active,
            started: Instant::now(),
        })
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Makes every statement issued through the transaction permanent.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        let result = self.session.driver.commit();
        self.session.in_transaction = false;
        match result {
            Ok(()) => {
                self.state = TxState::Committed;
                info!(
                    duration_ms = self.started.elapsed().as_millis(),
                    "session.transaction.commit"
                );
                Ok(())
            }
            Err(err) => {
                self.state = TxState::RolledBack;
                warn!(error = %err, "session.transaction.commit_failed");
                Err(err)
            }
        }
    }

    /// Discards every statement issued through the transaction.
    ///
    /// The cache keeps whatever the discarded writes put there; see the
    /// type-level docs.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        self.finish_rollback()
    }

    fn finish_rollback(&mut self) -> Result<()> {
        let result = self.session.driver.rollback();
        self.session.in_transaction = false;
        self.state = TxState::RolledBack;
        warn!("session.transaction.rollback");
        result
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(GraphError::InvalidArgument(
                "transaction is no longer active".into(),
            ));
        }
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!("session.transaction.dropped_active");
            if let Err(err) = self.finish_rollback() {
                warn!(error = %err, "session.transaction.rollback_failed");
            }
        }
    }
}

impl Session {
    /// Opens a driver transaction. Only one may be open per session.
    pub fn begin_transaction(&mut self) -> Result<Transaction<'_>> {
        Transaction::new(self)
    }
}
