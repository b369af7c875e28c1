//! Late-bound user callbacks.
//!
//! A [`ProgressCallbacks`] registry is handed to the subscription once,
//! at construction. Handlers are looked up on every dispatch, so they can
//! be swapped at any time without touching the live connection.

use std::sync::{Arc, RwLock};

use crate::reducer::{Effect, ProgressUpdate};

type ProgressHandler = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;
type CompleteHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Registry of `on_progress`, `on_complete` and `on_error` handlers.
#[derive(Default)]
pub struct ProgressCallbacks {
    on_progress: RwLock<Option<ProgressHandler>>,
    on_complete: RwLock<Option<CompleteHandler>>,
    on_error: RwLock<Option<ErrorHandler>>,
}

impl ProgressCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_progress<F>(&self, handler: F)
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        replace(&self.on_progress, Some(Arc::new(handler)));
    }

    pub fn set_on_complete<F>(&self, handler: F)
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        replace(&self.on_complete, Some(Arc::new(handler)));
    }

    pub fn set_on_error<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        replace(&self.on_error, Some(Arc::new(handler)));
    }

    /// Remove every registered handler.
    pub fn clear(&self) {
        replace(&self.on_progress, None);
        replace(&self.on_complete, None);
        replace(&self.on_error, None);
    }

    /// Invoke the handler matching `effect`, if one is registered.
    ///
    /// The handler is cloned out of the lock before it runs, so a
    /// handler may itself re-register handlers.
    pub(crate) fn dispatch(&self, effect: &Effect) {
        match effect {
            Effect::Progress(update) => {
                if let Some(handler) = current(&self.on_progress) {
                    handler(update);
                }
            }
            Effect::Complete(data) => {
                if let Some(handler) = current(&self.on_complete) {
                    handler(data);
                }
            }
            Effect::Error(detail) => {
                if let Some(handler) = current(&self.on_error) {
                    handler(detail);
                }
            }
        }
    }
}

fn replace<T>(slot: &RwLock<Option<T>>, value: Option<T>) {
    // A poisoned slot only means a handler panicked; the value is still valid.
    *slot.write().unwrap_or_else(|e| e.into_inner()) = value;
}

fn current<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
    slot.read().unwrap_or_else(|e| e.into_inner()).clone()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    fn update(progress: u8) -> ProgressUpdate {
        ProgressUpdate {
            progress,
            status: String::new(),
            message: String::new(),
            stage: String::new(),
            substage: String::new(),
            step: None,
            total_steps: None,
            url: None,
        }
    }

    #[test]
    fn dispatch_without_handlers_is_noop() {
        let callbacks = ProgressCallbacks::new();
        callbacks.dispatch(&Effect::Progress(update(10)));
        callbacks.dispatch(&Effect::Error("boom".into()));
    }

    #[test]
    fn dispatch_routes_to_matching_handler() {
        let callbacks = ProgressCallbacks::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        callbacks.set_on_progress(move |u| log.lock().unwrap().push(format!("progress:{}", u.progress)));
        let log = Arc::clone(&seen);
        callbacks.set_on_complete(move |d| log.lock().unwrap().push(format!("complete:{d}")));
        let log = Arc::clone(&seen);
        callbacks.set_on_error(move |e| log.lock().unwrap().push(format!("error:{e}")));

        callbacks.dispatch(&Effect::Progress(update(40)));
        callbacks.dispatch(&Effect::Error("timeout".into()));
        callbacks.dispatch(&Effect::Complete(serde_json::json!({"id": 1})));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["progress:40", "error:timeout", r#"complete:{"id":1}"#]
        );
    }

    #[test]
    fn replaced_handler_takes_effect_immediately() {
        let callbacks = ProgressCallbacks::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        callbacks.set_on_progress(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        callbacks.dispatch(&Effect::Progress(update(1)));

        let counter = Arc::clone(&second);
        callbacks.set_on_progress(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        callbacks.dispatch(&Effect::Progress(update(2)));

        callbacks.clear();
        callbacks.dispatch(&Effect::Progress(update(3)));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
