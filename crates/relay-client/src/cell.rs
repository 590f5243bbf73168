//! Single-writer, multi-reader observable value.

use tokio::sync::watch;

/// Writer half. Only the owner of an `ObservableCell` can change the value.
#[derive(Debug)]
pub struct ObservableCell<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> ObservableCell<T> {
    /// Cell holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the value and notify readers.
    pub fn set(&self, value: T) {
        let _ = self.tx.send_replace(value);
    }

    /// Modify in place. Readers are notified only if `f` returns `true`.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) {
        let _ = self.tx.send_if_modified(f);
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// A read-only handle.
    pub fn reader(&self) -> CellReader<T> {
        CellReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Reader half: synchronous `get` plus change notification.
#[derive(Debug, Clone)]
pub struct CellReader<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> CellReader<T> {
    /// Current value.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Current value, marking it as seen.
    pub fn get_and_mark_seen(&mut self) -> T {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next change. Returns `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Whether the value changed since last seen.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}
