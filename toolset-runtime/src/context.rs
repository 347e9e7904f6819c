//! Access to the caller context of the request a handler is serving.

use std::future::Future;

use toolset_primitives::RequestContext;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Returns the context of the request being handled on this task.
///
/// Outside a dispatched handler the context is empty.
#[must_use]
pub fn current_context() -> RequestContext {
    REQUEST_CONTEXT
        .try_with(RequestContext::clone)
        .unwrap_or_default()
}

/// Returns the caller's bearer token for the request being handled.
#[must_use]
pub fn current_user_jwt() -> Option<String> {
    REQUEST_CONTEXT
        .try_with(|context| context.user_jwt().map(str::to_owned))
        .ok()
        .flatten()
}

pub(crate) async fn scope<F>(context: RequestContext, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_CONTEXT.scope(context, future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_is_visible_only_inside_scope() {
        assert!(current_context().is_empty());

        let context = RequestContext::new().with_user_jwt("token");
        let seen = scope(context.clone(), async { (current_context(), current_user_jwt()) }).await;
        assert_eq!(seen.0, context);
        assert_eq!(seen.1.as_deref(), Some("token"));

        assert!(current_user_jwt().is_none());
    }
}
