//! Detach handles for callback-style subscriptions.

use std::fmt;

/// Handle returned when a listener is attached to a callback-based source.
///
/// Calling [`DetachHandle::detach`] (or dropping the handle) runs the
/// source's cleanup exactly once.
#[must_use = "dropping a DetachHandle detaches the listener immediately"]
pub struct DetachHandle {
    on_detach: Option<Box<dyn FnOnce() + Send>>,
}

impl DetachHandle {
    /// Create a handle that runs `on_detach` when detached.
    pub fn new(on_detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_detach: Some(Box::new(on_detach)),
        }
    }

    /// A handle with nothing to clean up.
    pub fn noop() -> Self {
        Self { on_detach: None }
    }

    /// Detach the listener now.
    pub fn detach(mut self) {
        self.run();
    }

    /// Whether the listener is still attached.
    pub fn is_attached(&self) -> bool {
        self.on_detach.is_some()
    }

    fn run(&mut self) {
        if let Some(f) = self.on_detach.take() {
            f();
        }
    }
}

impl Drop for DetachHandle {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for DetachHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}
