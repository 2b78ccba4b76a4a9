use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::protocol::DeadlineHandle;

type Hook = Box<dyn Fn() + Send>;

#[derive(Default)]
struct State {
    cancelled: bool,
    next_id: u64,
    hooks: Vec<(u64, Hook)>,
}

/// Cooperative cancellation signal, shared between the thread running a query and any
/// thread that wants to stop it.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<Mutex<State>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fires the token. Hooks run once, on the calling thread.
    pub fn cancel(&self) {
        let hooks = {
            let mut state = self.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.hooks)
        };
        for (_, hook) in hooks {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Registers `hook` to run on cancellation. If the token already fired the hook runs
    /// immediately and nothing is registered.
    pub(crate) fn subscribe(&self, hook: impl Fn() + Send + 'static) -> Option<u64> {
        let mut state = self.lock();
        if state.cancelled {
            drop(state);
            hook();
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.hooks.push((id, Box::new(hook)));
        Some(id)
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.lock().hooks.retain(|(hook_id, _)| *hook_id != id);
    }

    #[cfg(test)]
    fn hook_count(&self) -> usize {
        self.lock().hooks.len()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Ties a token to a transport for the duration of one operation: firing the token
/// expires the transport's deadline. Dropping the watcher disarms it.
#[derive(Debug)]
pub(crate) struct Watcher {
    token: CancelToken,
    id: Option<u64>,
}

impl Watcher {
    pub(crate) fn arm(token: &CancelToken, handle: DeadlineHandle) -> Self {
        let id = token.subscribe(move || handle.expire());
        Self {
            token: token.clone(),
            id,
        }
    }

    pub(crate) fn fired(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.token.unsubscribe(id);
        }
    }
}
