//! Hexagonal ports implemented by adapter crates.
//!
//! `tcc-mtproto` implements the login and channel transports over a user
//! account; `tcc-telegram` implements the progress sink over the Bot API.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{
        AccountInfo, ChannelId, ChannelInfo, ChannelRef, HistoryItem, Membership, MessageId,
        UserId,
    },
    errors::TransportError,
    store::SessionBlob,
};

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// An authenticated user-account connection able to read and write channels.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Resolve a username or numeric reference to a marked channel id.
    async fn resolve_channel(&self, channel: &ChannelRef) -> TransportResult<ChannelId>;

    async fn channel_info(&self, channel: ChannelId) -> TransportResult<ChannelInfo>;

    /// Standing of the logged-in account in `channel`.
    async fn membership(&self, channel: ChannelId) -> TransportResult<Membership>;

    /// One page of history, newest first, containing ids strictly below
    /// `offset_id` (`MessageId(0)` starts at the newest message).
    async fn history_page(
        &self,
        channel: ChannelId,
        offset_id: MessageId,
        limit: usize,
    ) -> TransportResult<Vec<HistoryItem>>;

    /// Re-post one message into `to` without any "forwarded from" attribution.
    async fn copy_message(
        &self,
        from: ChannelId,
        to: ChannelId,
        id: MessageId,
    ) -> TransportResult<()>;

    async fn whoami(&self) -> TransportResult<AccountInfo>;

    fn is_connected(&self) -> bool;

    /// Invalidate the session server-side.
    async fn sign_out(&self) -> TransportResult<()>;

    async fn close(&self);
}

/// What the platform answered to a login code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeOutcome {
    Authorized,
    PasswordRequired { hint: Option<String> },
}

/// A fresh, unauthenticated connection pinned to one login attempt.
///
/// The code challenge is bound to this connection, so it lives for the whole
/// attempt and is closed on every exit path.
#[async_trait]
pub trait LoginConnection: Send {
    async fn request_code(&mut self, phone: &str) -> TransportResult<()>;

    async fn submit_code(&mut self, code: &str) -> TransportResult<CodeOutcome>;

    async fn submit_password(&mut self, password: &str) -> TransportResult<()>;

    /// Durable blob from which `LoginConnector::restore` can rebuild the session.
    async fn export_session(&mut self) -> TransportResult<SessionBlob>;

    async fn close(&mut self);

    /// Hand the now-authorized connection over as a long-lived transport.
    fn into_transport(self: Box<Self>) -> Arc<dyn ChannelTransport>;
}

#[async_trait]
pub trait LoginConnector: Send + Sync {
    async fn connect(&self, user: UserId) -> TransportResult<Box<dyn LoginConnection>>;

    /// Rebuild an authorized transport from a persisted blob.
    async fn restore(
        &self,
        user: UserId,
        blob: &SessionBlob,
    ) -> TransportResult<Arc<dyn ChannelTransport>>;
}

/// Best-effort receiver of rendered progress lines.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, text: &str);
}

/// Sink that drops everything.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn report(&self, _text: &str) {}
}
