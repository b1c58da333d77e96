//! The per-request-type payload a [`super::RequestContext`] owns exclusively
//! until `send_reply` hands the reply back out.
//!
//! The typed constructor ([`super::RequestContext::new_typed`]) is the only
//! public way to build a routing-mode context; the untyped base
//! constructor is an internal contract between this module and
//! `context/mod.rs`.

/// A request's protocol-specific payload, able to send exactly one reply
/// through whatever transport constructed it (a socket write, a channel
/// send to a [`crate::stats`]-style writer task, and so on).
pub trait ReplyPayload: Send + 'static {
    /// The reply type this payload accepts.
    type Reply: Send;

    /// Delivers the client-visible reply. Called at most once, by
    /// [`super::RequestContext::send_reply`].
    fn send_reply_impl(&mut self, reply: Self::Reply);
}
