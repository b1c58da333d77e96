//! Reply logging hooks and the completion callback a request context fires
//! exactly once per logical request.

use std::time::Instant;

/// Identity of a single backend a reply came from.
#[derive(Debug, Clone)]
pub struct AccessPoint {
    pub address: String,
    pub metadata: Option<String>,
}

/// Everything a [`ReplyLogger`] needs to record one backend reply.
#[derive(Debug, Clone)]
pub struct BackendReply<'a> {
    pub request_id: u64,
    pub pool: &'a str,
    pub access_point: &'a AccessPoint,
    pub prefix: &'a str,
    pub request_summary: &'a str,
    pub reply_summary: &'a str,
    pub t_start: Instant,
    pub t_end: Instant,
}

/// A destination for `on_reply_received` events. Routing-mode contexts call
/// the primary logger and then every additional logger, in that order;
/// recording-mode contexts never call any.
pub trait ReplyLogger: Send + Sync {
    fn log_reply(&self, reply: &BackendReply<'_>);
}

/// A logger that drops everything it is given, used where no logger was
/// configured.
pub struct NullLogger;

impl ReplyLogger for NullLogger {
    fn log_reply(&self, reply: &BackendReply<'_>) {
        tracing::trace!(
            request_id = reply.request_id,
            pool = reply.pool,
            prefix = reply.prefix,
            "reply logged to null logger"
        );
    }
}

/// A one-shot callback a request context fires after its client-visible
/// reply has been enqueued (or, for a context dropped without a reply,
/// after the synthetic error reply is enqueued). Consumed on first fire.
pub struct CompletionHook(Box<dyn FnOnce(u64) + Send>);

impl CompletionHook {
    pub fn new(f: impl FnOnce(u64) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn fire(self, request_id: u64) {
        (self.0)(request_id);
    }
}

impl std::fmt::Debug for CompletionHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHook").finish_non_exhaustive()
    }
}

/// A one-shot baton a recording context signals on last-reference-drop, so
/// the thread that started a recording traversal can wait for it to finish
/// fanning out without polling.
pub struct Baton(Option<tokio::sync::oneshot::Sender<()>>);

/// The receiving half of a [`Baton`].
pub struct BatonWaiter(tokio::sync::oneshot::Receiver<()>);

impl Baton {
    pub fn new() -> (Baton, BatonWaiter) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (Baton(Some(tx)), BatonWaiter(rx))
    }

    /// Signals the baton. A no-op if already signalled.
    pub fn signal(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl BatonWaiter {
    /// Waits for the baton to be signalled, or returns immediately if the
    /// signalling side was dropped without signalling.
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_hook_fires_once() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        let hook = CompletionHook::new(move |id| *seen_clone.lock().unwrap() = Some(id));
        hook.fire(42);
        assert_eq!(*seen.lock().unwrap(), Some(42));
    }

    #[tokio::test]
    async fn baton_wakes_waiter_on_signal() {
        let (mut baton, waiter) = Baton::new();
        baton.signal();
        waiter.wait().await;
    }

    #[tokio::test]
    async fn baton_wakes_waiter_on_drop_without_signal() {
        let (baton, waiter) = Baton::new();
        drop(baton);
        waiter.wait().await;
    }
}
