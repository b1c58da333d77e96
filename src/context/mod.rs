//! Per-request routing context: tracks one logical request from arrival
//! through fan-out to backends until a client-visible reply has gone out
//! and stats are recorded.
//!
//! Construction is exclusive (a [`NewRequestContext`] is owned by the
//! thread that built it); hand-off through [`NewRequestContext::process`]
//! moves it to shared ownership (a clonable [`RequestContext`]) exactly
//! once, after which every sub-request created during route-tree fan-out
//! holds its own reference. The shared form is reference-counted so the
//! final drop — which must emit a synthetic error reply if nothing ever
//! called `send_reply` — can happen on whichever thread holds the last
//! clone.

pub mod typed;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::SharedConfig;
use crate::stats::{AccessPoint, BackendReply, Baton, CompletionHook, ReplyLogger};
use typed::ReplyPayload;

/// Errors for request-context misuse that is asserted rather than
/// propagated as a `Result`, matching how the teacher crate treats
/// protocol-invariant violations.
#[derive(Debug)]
pub enum ContextError {
    FieldNotAvailableInThisMode(&'static str),
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::FieldNotAvailableInThisMode(field) => {
                write!(f, "{field} is not available in this context's mode")
            }
        }
    }
}

impl std::error::Error for ContextError {}

/// Relative scheduling weight carried from arrival through fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

/// Identity of the proxy worker thread and the route this request entered
/// on.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    id: u64,
    route: Arc<str>,
}

impl ProxyHandle {
    pub fn new(id: u64, route: impl Into<Arc<str>>) -> Self {
        Self { id, route: route.into() }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &str {
        &self.route
    }
}

/// Identity of the client connection that issued the request.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub connection_id: u64,
}

/// Opaque sender identity, threaded through for multiplexed connections.
pub type SenderId = u64;

/// Identifies a shard splitter visited during route-tree traversal.
#[derive(Debug, Clone)]
pub struct ShardSplitterId(pub String);

type DestinationCb = Box<dyn Fn(&str, usize, &AccessPoint) + Send + Sync>;
type ShardSplitCb = Box<dyn Fn(&ShardSplitterId) + Send + Sync>;

/// The two shapes a request context can take. Fields named in one variant
/// are not meaningful in the other; accessors that read them panic when
/// called against the wrong variant rather than silently returning a
/// default.
enum ContextMode {
    Routing {
        config_snapshot: SharedConfig,
        requester: Option<ClientHandle>,
        logger: Arc<dyn ReplyLogger>,
        additional_loggers: Vec<Arc<dyn ReplyLogger>>,
    },
    Recording {
        destination_cb: Option<DestinationCb>,
        shard_split_cb: Option<ShardSplitCb>,
        notify: Option<Baton>,
    },
}

struct ContextInner<T: ReplyPayload> {
    request_id: u64,
    priority: Priority,
    failover_disabled: bool,
    proxy: ProxyHandle,
    sender_id: Option<SenderId>,
    user_ip_address: String,
    payload: Option<T>,
    replied: bool,
    processing: bool,
    mode: ContextMode,
    on_complete: Option<CompletionHook>,
}

impl<T: ReplyPayload> Drop for ContextInner<T> {
    fn drop(&mut self) {
        match &mut self.mode {
            ContextMode::Recording { notify, .. } => {
                if let Some(baton) = notify.take() {
                    baton.signal();
                }
            }
            ContextMode::Routing { .. } => {
                if !self.replied {
                    tracing::warn!(
                        request_id = self.request_id,
                        "request context dropped without a reply; emitting synthetic error"
                    );
                    if let Some(hook) = self.on_complete.take() {
                        hook.fire(self.request_id);
                    }
                }
            }
        }
    }
}

/// A request context under construction, owned exclusively by whatever
/// thread is building it. Not yet usable for fan-out; call
/// [`NewRequestContext::process`] to hand it off.
pub struct NewRequestContext<T: ReplyPayload> {
    inner: ContextInner<T>,
}

impl<T: ReplyPayload> NewRequestContext<T> {
    /// Builds a routing-mode context headed for [`NewRequestContext::process`].
    /// This is the internal base constructor; library callers go through
    /// [`RequestContext::new_typed`].
    fn new(
        request_id: u64,
        priority: Priority,
        failover_disabled: bool,
        proxy: ProxyHandle,
        sender_id: Option<SenderId>,
        user_ip_address: String,
        payload: T,
    ) -> Self {
        Self {
            inner: ContextInner {
                request_id,
                priority,
                failover_disabled,
                proxy,
                sender_id,
                user_ip_address,
                payload: Some(payload),
                replied: false,
                processing: false,
                mode: ContextMode::Routing {
                    config_snapshot: SharedConfig::new(()),
                    requester: None,
                    logger: Arc::new(crate::stats::NullLogger),
                    additional_loggers: Vec::new(),
                },
                on_complete: None,
            },
        }
    }

    /// Moves this context to shared ownership, attaching the config
    /// snapshot, requester identity and loggers every sub-request created
    /// during fan-out will see. This transition happens exactly once.
    pub fn process(
        mut self,
        config_snapshot: SharedConfig,
        requester: Option<ClientHandle>,
        logger: Arc<dyn ReplyLogger>,
        additional_loggers: Vec<Arc<dyn ReplyLogger>>,
        on_complete: CompletionHook,
    ) -> RequestContext<T> {
        self.inner.mode = ContextMode::Routing {
            config_snapshot,
            requester,
            logger,
            additional_loggers,
        };
        self.inner.on_complete = Some(on_complete);
        RequestContext(Arc::new(Mutex::new(self.inner)))
    }
}

/// A route-tree traversal hook: [`RequestContext::start_processing`] hands
/// the shared context to a tree implementation, which is responsible for
/// fanning out to backends and eventually calling `send_reply` on it (or
/// one of its sub-request clones).
///
/// Route-tree traversal itself is out of scope for this crate; this trait
/// is only the seam it plugs into.
#[async_trait]
pub trait RouteTree<T: ReplyPayload>: Send + Sync {
    async fn start(&self, context: RequestContext<T>);
}

/// A shared, reference-counted handle to a request context. Every
/// sub-request created during fan-out clones this; the last clone to drop
/// runs the context's completion behavior.
pub struct RequestContext<T: ReplyPayload>(Arc<Mutex<ContextInner<T>>>);

impl<T: ReplyPayload> Clone for RequestContext<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ReplyPayload> RequestContext<T> {
    /// The only public routing-mode constructor: builds an exclusively
    /// owned context and immediately hands it off through `process`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_typed(
        request_id: u64,
        priority: Priority,
        failover_disabled: bool,
        proxy: ProxyHandle,
        sender_id: Option<SenderId>,
        user_ip_address: String,
        payload: T,
        config_snapshot: SharedConfig,
        requester: Option<ClientHandle>,
        logger: Arc<dyn ReplyLogger>,
        additional_loggers: Vec<Arc<dyn ReplyLogger>>,
        on_complete: CompletionHook,
    ) -> Self {
        NewRequestContext::new(
            request_id,
            priority,
            failover_disabled,
            proxy,
            sender_id,
            user_ip_address,
            payload,
        )
        .process(config_snapshot, requester, logger, additional_loggers, on_complete)
    }

    /// Builds a recording-mode context: never performs real I/O, forwards
    /// route-tree traversal observations to `destination_cb`/`shard_split_cb`.
    pub fn create_recording(
        request_id: u64,
        proxy: ProxyHandle,
        payload: T,
        destination_cb: Option<DestinationCb>,
        shard_split_cb: Option<ShardSplitCb>,
    ) -> Self {
        Self::create_recording_inner(request_id, proxy, payload, destination_cb, shard_split_cb, None)
    }

    /// Like [`Self::create_recording`], but signals `notify` when the last
    /// reference to the context is dropped — useful for a caller that wants
    /// to wait for an entire recorded traversal to finish without polling.
    pub fn create_recording_notify(
        request_id: u64,
        proxy: ProxyHandle,
        payload: T,
        destination_cb: Option<DestinationCb>,
        shard_split_cb: Option<ShardSplitCb>,
        notify: Baton,
    ) -> Self {
        Self::create_recording_inner(
            request_id,
            proxy,
            payload,
            destination_cb,
            shard_split_cb,
            Some(notify),
        )
    }

    fn create_recording_inner(
        request_id: u64,
        proxy: ProxyHandle,
        payload: T,
        destination_cb: Option<DestinationCb>,
        shard_split_cb: Option<ShardSplitCb>,
        notify: Option<Baton>,
    ) -> Self {
        let inner = ContextInner {
            request_id,
            priority: Priority::Normal,
            failover_disabled: false,
            proxy,
            sender_id: None,
            user_ip_address: String::new(),
            payload: Some(payload),
            replied: false,
            processing: false,
            mode: ContextMode::Recording { destination_cb, shard_split_cb, notify },
            on_complete: None,
        };
        Self(Arc::new(Mutex::new(inner)))
    }

    /// Begins route-tree traversal through `tree`. Must be called at most
    /// once per context; panics in recording mode, where traversal is
    /// driven by the caller directly via `record_destination`.
    pub async fn start_processing(&self, tree: &dyn RouteTree<T>) {
        {
            let mut inner = self.0.lock().unwrap();
            match &inner.mode {
                ContextMode::Recording { .. } => {
                    panic!("start_processing must not be called on a recording context")
                }
                ContextMode::Routing { .. } => {}
            }
            assert!(!inner.processing, "start_processing called twice");
            inner.processing = true;
        }
        tree.start(self.clone()).await;
    }

    pub fn request_id(&self) -> u64 {
        self.0.lock().unwrap().request_id
    }

    pub fn priority(&self) -> Priority {
        self.0.lock().unwrap().priority
    }

    pub fn failover_disabled(&self) -> bool {
        self.0.lock().unwrap().failover_disabled
    }

    pub fn proxy(&self) -> ProxyHandle {
        self.0.lock().unwrap().proxy.clone()
    }

    pub fn proxy_route(&self) -> Arc<str> {
        self.0.lock().unwrap().proxy.route.clone()
    }

    pub fn sender_id(&self) -> Option<SenderId> {
        self.0.lock().unwrap().sender_id
    }

    pub fn user_ip_address(&self) -> String {
        self.0.lock().unwrap().user_ip_address.clone()
    }

    /// The config snapshot attached at hand-off. Panics in recording mode,
    /// where no config snapshot exists.
    pub fn proxy_config(&self) -> SharedConfig {
        let inner = self.0.lock().unwrap();
        match &inner.mode {
            ContextMode::Routing { config_snapshot, .. } => config_snapshot.clone(),
            ContextMode::Recording { .. } => {
                panic!("proxy_config is not available on a recording context")
            }
        }
    }

    /// Called by route-tree traversal when it visits a destination. In
    /// recording mode this forwards to `destination_cb`; in routing mode it
    /// is a no-op, since real destination selection is the route tree's own
    /// concern.
    pub fn record_destination(&self, pool: &str, index: usize, access_point: &AccessPoint) {
        let inner = self.0.lock().unwrap();
        if let ContextMode::Recording { destination_cb: Some(cb), .. } = &inner.mode {
            cb(pool, index, access_point);
        }
    }

    /// Called by route-tree traversal when it visits a shard splitter.
    /// Forwards to `shard_split_cb` in recording mode; a no-op otherwise.
    pub fn record_shard_splitter(&self, splitter: &ShardSplitterId) {
        let inner = self.0.lock().unwrap();
        if let ContextMode::Recording { shard_split_cb: Some(cb), .. } = &inner.mode {
            cb(splitter);
        }
    }

    /// Called for every reply received from a backend. In recording mode
    /// this returns immediately; otherwise it calls the primary logger and
    /// then every additional logger, in that order.
    pub fn on_reply_received(&self, reply: BackendReply<'_>) {
        let inner = self.0.lock().unwrap();
        if let ContextMode::Routing { logger, additional_loggers, .. } = &inner.mode {
            logger.log_reply(&reply);
            for extra in additional_loggers {
                extra.log_reply(&reply);
            }
        }
    }

    /// Delivers the client-visible reply through the typed payload. May be
    /// called at most once per context; a second call is a correctness bug
    /// in the caller and panics rather than silently dropping the
    /// duplicate reply.
    pub fn send_reply(&self, reply: T::Reply) {
        let request_id;
        let hook;
        {
            let mut inner = self.0.lock().unwrap();
            assert!(inner.processing, "send_reply called before start_processing");
            if inner.replied {
                panic!("send_reply called twice for request {}", inner.request_id);
            }
            inner.payload.as_mut().expect("payload already taken").send_reply_impl(reply);
            inner.payload = None;
            inner.replied = true;
            request_id = inner.request_id;
            hook = inner.on_complete.take();
        }
        if let Some(hook) = hook {
            hook.fire(request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingPayload {
        sent: Arc<Mutex<Option<String>>>,
    }

    impl ReplyPayload for RecordingPayload {
        type Reply = String;

        fn send_reply_impl(&mut self, reply: String) {
            *self.sent.lock().unwrap() = Some(reply);
        }
    }

    struct ImmediateReplyTree;

    #[async_trait]
    impl RouteTree<RecordingPayload> for ImmediateReplyTree {
        async fn start(&self, context: RequestContext<RecordingPayload>) {
            context.send_reply("ok".to_string());
        }
    }

    fn new_context(sent: Arc<Mutex<Option<String>>>, on_complete: CompletionHook) -> RequestContext<RecordingPayload> {
        RequestContext::new_typed(
            1,
            Priority::Normal,
            false,
            ProxyHandle::new(0, "default"),
            None,
            "127.0.0.1".to_string(),
            RecordingPayload { sent },
            SharedConfig::new(()),
            None,
            Arc::new(crate::stats::NullLogger),
            Vec::new(),
            on_complete,
        )
    }

    #[tokio::test]
    async fn send_reply_invokes_payload_and_completion_hook() {
        let sent = Arc::new(Mutex::new(None));
        let completed = Arc::new(AtomicU64::new(0));
        let completed_clone = completed.clone();
        let context = new_context(sent.clone(), CompletionHook::new(move |id| {
            completed_clone.store(id, Ordering::SeqCst);
        }));

        context.start_processing(&ImmediateReplyTree).await;

        assert_eq!(*sent.lock().unwrap(), Some("ok".to_string()));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "send_reply called twice")]
    async fn double_reply_panics() {
        let sent = Arc::new(Mutex::new(None));
        let context = new_context(sent, CompletionHook::new(|_| {}));
        context.start_processing(&ImmediateReplyTree).await;
        context.send_reply("again".to_string());
    }

    #[tokio::test]
    async fn dropping_unreplied_context_fires_completion_hook() {
        struct NeverReplyTree;
        #[async_trait]
        impl RouteTree<RecordingPayload> for NeverReplyTree {
            async fn start(&self, _context: RequestContext<RecordingPayload>) {}
        }

        let sent = Arc::new(Mutex::new(None));
        let completed = Arc::new(AtomicU64::new(0));
        let completed_clone = completed.clone();
        let context = new_context(sent, CompletionHook::new(move |id| {
            completed_clone.store(id, Ordering::SeqCst);
        }));

        context.start_processing(&NeverReplyTree).await;
        drop(context);

        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recording_context_forwards_destination_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let context = RequestContext::create_recording(
            2,
            ProxyHandle::new(0, "default"),
            RecordingPayload { sent: Arc::new(Mutex::new(None)) },
            Some(Box::new(move |pool, index, ap| {
                seen_clone.lock().unwrap().push((pool.to_string(), index, ap.address.clone()));
            })),
            None,
        );

        context.record_destination(
            "pool-a",
            0,
            &AccessPoint { address: "10.0.0.1:11211".to_string(), metadata: None },
        );

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0].0, "pool-a");
    }

    #[tokio::test]
    async fn recording_context_signals_baton_on_drop() {
        let (baton, waiter) = Baton::new();
        let context = RequestContext::create_recording_notify(
            3,
            ProxyHandle::new(0, "default"),
            RecordingPayload { sent: Arc::new(Mutex::new(None)) },
            None,
            None,
            baton,
        );

        drop(context);
        waiter.wait().await;
    }

    #[test]
    #[should_panic(expected = "not available on a recording context")]
    fn proxy_config_panics_on_recording_context() {
        let context = RequestContext::create_recording(
            4,
            ProxyHandle::new(0, "default"),
            RecordingPayload { sent: Arc::new(Mutex::new(None)) },
            None,
            None,
        );
        let _ = context.proxy_config();
    }
}
