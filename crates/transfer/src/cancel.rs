use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler = Box<dyn FnOnce() + Send>;

/// Ordered set of abort callbacks for one upload.
///
/// [`cancel`](Self::cancel) runs every registered handler once, in
/// registration order. Later calls do nothing. Handlers added after
/// cancellation run immediately.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
    cancelled: bool,
}

fn lock(m: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler`. Dropping the returned guard unregisters it.
    pub fn add_handler(&self, handler: impl FnOnce() + Send + 'static) -> HandlerGuard {
        let mut state = lock(&self.inner.state);
        if state.cancelled {
            drop(state);
            handler();
            return HandlerGuard {
                registry: Weak::new(),
                id: None,
            };
        }

        let id = state.next_id;
        state.next_id += 1;
        state.handlers.push((id, Box::new(handler)));
        HandlerGuard {
            registry: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    pub fn cancel(&self) {
        let handlers = {
            let mut state = lock(&self.inner.state);
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.handlers)
        };

        for (_, handler) in handlers {
            handler();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.inner.state).cancelled
    }

    /// A cloneable handle that can only cancel.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            registry: self.clone(),
        }
    }

    fn remove(inner: &RegistryInner, id: u64) {
        lock(&inner.state).handlers.retain(|(h, _)| *h != id);
    }
}

impl fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("CancellationRegistry")
            .field("handlers", &state.handlers.len())
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

/// Unregisters a handler when dropped, so finished operations are not aborted.
#[must_use = "dropping the guard unregisters the handler immediately"]
#[derive(Debug)]
pub struct HandlerGuard {
    registry: Weak<RegistryInner>,
    id: Option<u64>,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        if let (Some(id), Some(inner)) = (self.id, self.registry.upgrade()) {
            CancellationRegistry::remove(&inner, id);
        }
    }
}

/// Handed to callers so they can abort an upload in flight.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    registry: CancellationRegistry,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.registry.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled()
    }
}
