//! Registry of push message handlers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use fva_shared::PushMessage;

pub type PushHandler = Arc<dyn Fn(&PushMessage) -> anyhow::Result<()> + Send + Sync>;

/// Token returned by [`PushHandlers::add`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered list of subscribers. Every handler sees every push message; a
/// handler that fails or panics is logged and skipped.
#[derive(Default)]
pub struct PushHandlers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, PushHandler)>>,
}

impl PushHandlers {
    pub fn add(
        &self,
        handler: impl Fn(&PushMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` if the handler was not registered.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every handler in registration order. Returns how many
    /// handlers completed without error.
    pub fn dispatch(&self, message: &PushMessage) -> usize {
        // Handlers may (un)register from inside a callback.
        let handlers: Vec<PushHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    crate::log_error!("Push handler failed for {}: {:#}", message.kind.as_str(), e)
                }
                Err(_) => crate::log_error!("Push handler panicked for {}", message.kind.as_str()),
            }
        }
        delivered
    }
}
