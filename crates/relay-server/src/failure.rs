//! Failure resolver: the single place a default failure message can be
//! replaced before it reaches the client.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use relay_core::FailureContext;
use tracing::warn;

use crate::errors::{Failure, ResolvedFailure};

/// Override hook. `Ok(Some(message))` replaces the default message,
/// `Ok(None)` keeps it, `Err` is logged and ignored.
pub type FailureHook =
    Arc<dyn Fn(&FailureContext) -> Result<Option<String>, String> + Send + Sync>;

/// Funnels failure contexts through an optional [`FailureHook`].
///
/// Never fails: hook errors and panics fall back to the default message.
#[derive(Clone, Default)]
pub struct FailureResolver {
    hook: Option<FailureHook>,
}

impl FailureResolver {
    /// Resolver with no hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver with an override hook.
    pub fn with_hook<F>(hook: F) -> Self
    where
        F: Fn(&FailureContext) -> Result<Option<String>, String> + Send + Sync + 'static,
    {
        Self {
            hook: Some(Arc::new(hook)),
        }
    }

    /// Final message for `context`.
    pub fn resolve(&self, context: &FailureContext) -> String {
        let Some(hook) = &self.hook else {
            return context.message.clone();
        };
        match catch_unwind(AssertUnwindSafe(|| hook(context))) {
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => context.message.clone(),
            Ok(Err(error)) => {
                warn!(stage = %context.stage, error = %error, "failure hook returned an error");
                context.message.clone()
            }
            Err(_) => {
                warn!(stage = %context.stage, "failure hook panicked");
                context.message.clone()
            }
        }
    }

    /// Resolve a request-time failure into its response form.
    pub fn resolve_failure(&self, failure: &Failure) -> ResolvedFailure {
        ResolvedFailure {
            status: failure.status,
            stage: failure.context.stage,
            message: self.resolve(&failure.context),
        }
    }
}

impl std::fmt::Debug for FailureResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureResolver")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use relay_core::FailureStage;

    fn ctx() -> FailureContext {
        FailureContext::new(FailureStage::Authorization, "Forbidden").with_status(403)
    }

    #[test]
    fn no_hook_keeps_default() {
        assert_eq!(FailureResolver::new().resolve(&ctx()), "Forbidden");
    }

    #[test]
    fn hook_overrides_message() {
        let resolver = FailureResolver::with_hook(|c| {
            Ok(Some(format!("{} says no", c.stage)))
        });
        assert_eq!(resolver.resolve(&ctx()), "authorization says no");
    }

    #[test]
    fn hook_none_keeps_default() {
        let resolver = FailureResolver::with_hook(|_| Ok(None));
        assert_eq!(resolver.resolve(&ctx()), "Forbidden");
    }

    #[test]
    fn hook_error_is_swallowed() {
        let resolver = FailureResolver::with_hook(|_| Err("hook broke".into()));
        assert_eq!(resolver.resolve(&ctx()), "Forbidden");
    }

    #[test]
    fn hook_panic_is_swallowed() {
        let resolver = FailureResolver::with_hook(|_| panic!("hook exploded"));
        assert_eq!(resolver.resolve(&ctx()), "Forbidden");
    }

    #[test]
    fn hook_sees_full_context() {
        let resolver = FailureResolver::with_hook(|c| {
            Ok(c.topics.first().map(|t| format!("bad topic {t}")))
        });
        let failure = Failure::new(
            FailureStage::TopicValidation,
            StatusCode::BAD_REQUEST,
            "Unknown topics",
        )
        .map_context(|c| c.with_topics(["nope"]));
        let resolved = resolver.resolve_failure(&failure);
        assert_eq!(resolved.message, "bad topic nope");
        assert_eq!(resolved.status, StatusCode::BAD_REQUEST);
        assert_eq!(resolved.stage, FailureStage::TopicValidation);
    }
}
