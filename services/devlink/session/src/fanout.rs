//! Message fan-out registry.
//!
//! Independent consumers subscribe to every decoded inbound frame under a key
//! of their choosing. Registering an existing key replaces its handler.
//! Handlers run synchronously on the link driver; a handler that fails or
//! panics is logged and skipped without affecting the others.

use dashmap::DashMap;
use devlink_wire::InboundFrame;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Callback invoked for each inbound frame
pub type MessageHandler = Arc<dyn Fn(&InboundFrame) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of dispatching one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Keyed set of inbound message handlers
#[derive(Clone, Default)]
pub struct FanoutRegistry {
    handlers: Arc<DashMap<String, MessageHandler>>,
}

impl std::fmt::Debug for FanoutRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl FanoutRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `key`, replacing any previous handler
    pub fn register<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&InboundFrame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.handlers.insert(key.clone(), Arc::new(handler)).is_some() {
            debug!("Replaced message handler {}", key);
        } else {
            debug!("Registered message handler {}", key);
        }
    }

    /// Remove the handler under `key`
    pub fn unregister(&self, key: &str) -> bool {
        let removed = self.handlers.remove(key).is_some();
        if removed {
            debug!("Unregistered message handler {}", key);
        }
        removed
    }

    /// Whether a handler is registered under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Invoke every handler with `frame`.
    ///
    /// Handlers are collected first so they may register or unregister
    /// while running.
    pub fn dispatch(&self, frame: &InboundFrame) -> DispatchReport {
        let handlers: Vec<(String, MessageHandler)> = self
            .handlers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut report = DispatchReport::default();
        for (key, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("Message handler {} failed: {:#}", key, e);
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Message handler {} panicked", key);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame() -> InboundFrame {
        InboundFrame::Unrecognized(Value::from("hello"))
    }

    #[test]
    fn test_reregister_replaces_handler() {
        let registry = FanoutRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        registry.register("dashboard", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = second.clone();
        registry.register("dashboard", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(registry.len(), 1);
        registry.dispatch(&frame());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let registry = FanoutRegistry::new();
        let received = Arc::new(AtomicUsize::new(0));

        registry.register("A", |_| anyhow::bail!("dashboard exploded"));
        let counter = received.clone();
        registry.register("B", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = registry.dispatch(&frame());
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let registry = FanoutRegistry::new();
        let received = Arc::new(AtomicUsize::new(0));

        registry.register("A", |_| panic!("pin view bug"));
        let counter = received.clone();
        registry.register("B", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = registry.dispatch(&frame());
        assert_eq!(report.failed, 1);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unregister_itself() {
        let registry = FanoutRegistry::new();
        let inner = registry.clone();
        registry.register("once", move |_| {
            inner.unregister("once");
            Ok(())
        });

        assert_eq!(registry.dispatch(&frame()).delivered, 1);
        assert!(!registry.contains("once"));
        assert_eq!(registry.dispatch(&frame()).delivered, 0);
    }

    #[test]
    fn test_unregister_unknown_key() {
        let registry = FanoutRegistry::new();
        assert!(!registry.unregister("missing"));
        assert!(registry.is_empty());
    }
}
