// nofx-tools/src/registry.rs
// ============================================================================
// Module: Tool Registry
// Description: Process-local registry of `name -> ToolHandler` (§4.F).
// ============================================================================

//! A missing handler is a permanent step failure, not a retriable one (§4.F):
//! the registry itself never retries a lookup, and callers (the step runner)
//! treat `get` returning `None` as `NotFoundError`.

use std::collections::BTreeMap;
use std::sync::Arc;

use nofx_core::tool::ToolHandler;

use crate::handlers::EchoHandler;
use crate::handlers::FailHandler;
use crate::handlers::GateHandler;
use crate::handlers::SleepHandler;

/// Registry of `name -> ToolHandler`, generalized from the broker's
/// scheme-keyed `BTreeMap<String, Arc<dyn Source>>` registry idiom.
///
/// `gate:<type>` tool names are not registered one-by-one (the `<type>`
/// suffix is caller-chosen, unbounded): a registry built with
/// [`ToolRegistry::with_builtin_handlers`] falls back to a shared
/// [`GateHandler`] for any name carrying the `gate:` prefix that has no more
/// specific registration, matching §4.F's "gate:<type>" handler contract.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
    gate_fallback: Option<Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Creates an empty registry with no `gate:` fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the canonical test/demo
    /// handlers of §4.F.1: `echo`, `sleep`/`slow`, `fail`, and a `gate:<type>`
    /// fallback. Not meant to model production tools; it exists so the
    /// runner, recovery, and outbox components are independently testable
    /// without a caller-supplied registry.
    #[must_use]
    pub fn with_builtin_handlers() -> Self {
        let mut registry = Self::default();
        registry.register("echo", EchoHandler);
        registry.register("sleep", SleepHandler);
        registry.register("slow", SleepHandler);
        registry.register("fail", FailHandler);
        registry.gate_fallback = Some(Arc::new(GateHandler));
        registry
    }

    /// Registers a handler under `name`, replacing any prior registration.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Returns the handler registered for `name`, if any. Falls back to the
    /// `gate:` handler (if one was configured) for any name carrying that
    /// prefix with no more specific registration.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        if let Some(handler) = self.handlers.get(name).cloned() {
            return Some(handler);
        }
        if name.starts_with("gate:") {
            return self.gate_fallback.clone();
        }
        None
    }

    /// Returns every explicitly registered tool name, in sorted order. Does
    /// not enumerate the unbounded `gate:<type>` space covered by the
    /// fallback.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use nofx_core::model::Step;
    use nofx_core::tool::ToolContext;
    use nofx_core::tool::ToolError;
    use nofx_core::tool::ToolOutcome;

    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl ToolHandler for NoopHandler {
        async fn run(&self, _step: &Step, _ctx: &ToolContext) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::default())
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut registry = ToolRegistry::new();
        registry.register("noop", NoopHandler);
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list(), vec!["noop"]);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry = ToolRegistry::new();
        registry.register("noop", NoopHandler);
        registry.register("noop", NoopHandler);
        assert_eq!(registry.list(), vec!["noop"]);
    }

    #[test]
    fn builtin_handlers_cover_the_named_set() {
        let registry = ToolRegistry::with_builtin_handlers();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("sleep").is_some());
        assert!(registry.get("slow").is_some());
        assert!(registry.get("fail").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn gate_prefixed_names_fall_back_to_the_shared_gate_handler() {
        let registry = ToolRegistry::with_builtin_handlers();
        assert!(registry.get("gate:security-review").is_some());
        assert!(registry.get("gate:anything-at-all").is_some());
        assert!(!registry.list().iter().any(|name| name.starts_with("gate:")));
    }

    #[test]
    fn empty_registry_has_no_gate_fallback() {
        let registry = ToolRegistry::new();
        assert!(registry.get("gate:qa").is_none());
    }
}
