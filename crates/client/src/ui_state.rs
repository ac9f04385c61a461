//! Small piece of application-wide UI state shared between screens.

use std::sync::Arc;

use tokio::sync::watch;

/// Whether the search overlay is open.
#[derive(Debug, Clone)]
pub struct UiState {
    search_active: Arc<watch::Sender<bool>>,
}

impl UiState {
    pub fn new() -> Self {
        let (search_active, _) = watch::channel(false);
        Self {
            search_active: Arc::new(search_active),
        }
    }

    pub fn set_search_active(&self, active: bool) {
        self.search_active.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
    }

    pub fn is_search_active(&self) -> bool {
        *self.search_active.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.search_active.subscribe()
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}
