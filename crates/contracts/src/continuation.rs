//! One-shot release hook bound to a single hardware buffer.

use std::fmt;

type Hook = Box<dyn FnOnce() + Send + 'static>;

/// Deferred release of one transport buffer
///
/// Fires exactly once: explicitly through [`Continuation::fire`], or when
/// dropped without having fired.
#[derive(Default)]
pub struct Continuation {
    hook: Option<Hook>,
}

impl Continuation {
    pub fn new(hook: impl FnOnce() + Send + 'static) -> Self {
        Self {
            hook: Some(Box::new(hook)),
        }
    }

    /// Continuation that releases nothing
    pub fn noop() -> Self {
        Self { hook: None }
    }

    /// Whether a release hook is still pending
    pub fn is_armed(&self) -> bool {
        self.hook.is_some()
    }

    /// Run the release hook now
    pub fn fire(mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("armed", &self.is_armed())
            .finish()
    }
}
