//! Lifecycle callbacks.
//!
//! Listeners are invoked synchronously in registration order. Only
//! [`EventListener::on_pre_save`] can fail; its error aborts the save before
//! any statement is issued. Every other callback is informational.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::model::Handle;
use crate::types::Result;

/// What happened to the object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Written for the first time.
    Create,
    /// Hydrated from the database.
    Load,
    /// Existing entity changed.
    Update,
    /// Removed.
    Delete,
}

/// Callback payload.
#[derive(Clone, Debug)]
pub struct Event {
    /// Affected domain object.
    pub object: Handle,
    /// Kind of change.
    pub lifecycle: Lifecycle,
}

/// Receives lifecycle callbacks. Every method defaults to a no-op.
pub trait EventListener: Send + Sync {
    /// Before an object is captured for saving. May mutate the object.
    fn on_pre_save(&self, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// After a save statement succeeded.
    fn on_post_save(&self, _event: &Event) {}

    /// After an object was hydrated or reused by a load.
    fn on_post_load(&self, _event: &Event) {}

    /// Before a delete statement is issued.
    fn on_pre_delete(&self, _event: &Event) {}

    /// After an object was removed from the database and the cache.
    fn on_post_delete(&self, _event: &Event) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum Hook {
    PostSave,
    PostLoad,
    PreDelete,
    PostDelete,
}

/// Registered listeners.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl Listeners {
    pub(crate) fn register(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn dispose(&mut self, listener: &Arc<dyn EventListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        self.listeners.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn pre_save(&self, object: &Handle, lifecycle: Lifecycle) -> Result<()> {
        let event = Event {
            object: object.clone(),
            lifecycle,
        };
        for listener in &self.listeners {
            listener.on_pre_save(&event)?;
        }
        Ok(())
    }

    /// Starts a batch that delivers each (object, hook, lifecycle) once.
    pub(crate) fn batch(&self) -> Batch<'_> {
        Batch {
            listeners: self,
            seen: FxHashSet::default(),
        }
    }
}

/// Deduplicating notifier for one operation.
pub(crate) struct Batch<'a> {
    listeners: &'a Listeners,
    seen: FxHashSet<(usize, Hook, Lifecycle)>,
}

impl Batch<'_> {
    fn fire(&mut self, object: &Handle, hook: Hook, lifecycle: Lifecycle) {
        if self.listeners.listeners.is_empty()
            || !self.seen.insert((object.addr(), hook, lifecycle))
        {
            return;
        }
        let event = Event {
            object: object.clone(),
            lifecycle,
        };
        for listener in &self.listeners.listeners {
            match hook {
                Hook::PostSave => listener.on_post_save(&event),
                Hook::PostLoad => listener.on_post_load(&event),
                Hook::PreDelete => listener.on_pre_delete(&event),
                Hook::PostDelete => listener.on_post_delete(&event),
            }
        }
    }

    pub(crate) fn post_save(&mut self, object: &Handle, lifecycle: Lifecycle) {
        self.fire(object, Hook::PostSave, lifecycle);
    }

    /// Cached state of a neighbour changed as a side effect.
    pub(crate) fn updated(&mut self, object: &Handle) {
        self.fire(object, Hook::PostSave, Lifecycle::Update);
    }

    pub(crate) fn post_load(&mut self, object: &Handle) {
        self.fire(object, Hook::PostLoad, Lifecycle::Load);
    }

    pub(crate) fn pre_delete(&mut self, object: &Handle) {
        self.fire(object, Hook::PreDelete, Lifecycle::Delete);
    }

    pub(crate) fn post_delete(&mut self, object: &Handle) {
        self.fire(object, Hook::PostDelete, Lifecycle::Delete);
    }
}
