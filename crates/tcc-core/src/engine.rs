//! The cloning engine: paginate, filter, copy one by one, report.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChannelId, CloneJob, CloneMode, HistoryItem, ItemKind, Membership, MessageId, UserId},
    errors::TransportError,
    ports::{ChannelTransport, ProgressSink},
    report::{render_found, render_progress, CloneReport},
    store::SessionStore,
};

pub const CANCELLED_REASON: &str = "Cancelled by user.";
pub const EMPTY_RANGE_REASON: &str = "No messages found in the specified range.";
pub const FORWARDING_RESTRICTED_REASON: &str = "Channel has forwarding restricted. Cannot clone.";

#[derive(Clone, Debug)]
pub struct CloneSettings {
    /// Fixed spacing between processed items.
    pub item_delay: Duration,
    /// Emit a progress line every N processed items.
    pub progress_every: usize,
    pub page_size: usize,
    /// `None` retries rate-limited items forever.
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for CloneSettings {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_millis(1500),
            progress_every: 10,
            page_size: 100,
            max_rate_limit_retries: None,
        }
    }
}

/// Records the last replicated id of a full clone so a later run can resume.
///
/// Failures are logged and swallowed.
pub struct Checkpoint {
    store: Arc<dyn SessionStore>,
    source: ChannelId,
    user: UserId,
}

impl Checkpoint {
    pub fn new(store: Arc<dyn SessionStore>, source: ChannelId, user: UserId) -> Self {
        Self {
            store,
            source,
            user,
        }
    }

    pub async fn record(&self, id: MessageId) {
        if let Err(e) = self
            .store
            .update_high_water_mark(self.source, self.user, id)
            .await
        {
            tracing::warn!(
                user = self.user.0,
                source = self.source.0,
                "failed to record checkpoint {}: {e}",
                id.0
            );
        }
    }
}

/// Cancellable sleeps. Returns `false` when the token fired first.
struct Pacer<'a> {
    cancel: &'a CancellationToken,
}

impl Pacer<'_> {
    async fn wait(&self, d: Duration) -> bool {
        if d.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }
}

enum Halt {
    Cancelled,
    Failed(String),
}

enum CopyOutcome {
    Done(Result<(), TransportError>),
    Cancelled,
}

pub struct CloneEngine {
    settings: CloneSettings,
    store: Arc<dyn SessionStore>,
}

impl CloneEngine {
    pub fn new(settings: CloneSettings, store: Arc<dyn SessionStore>) -> Self {
        Self { settings, store }
    }

    /// Run one job to completion. Once started, every outcome is a report.
    pub async fn run(
        &self,
        transport: &dyn ChannelTransport,
        job: &CloneJob,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> CloneReport {
        let pacer = Pacer { cancel };
        let mut report = CloneReport::default();

        let items = match self.collect(transport, job, &pacer).await {
            Ok(items) => items,
            Err(Halt::Cancelled) => {
                report.abort(CANCELLED_REASON);
                return report;
            }
            Err(Halt::Failed(reason)) => {
                tracing::warn!(user = job.user_id.0, source = job.source.0, "pagination failed: {reason}");
                report.abort(reason);
                return report;
            }
        };

        let range = match job.mode {
            CloneMode::Range(r) => Some(r),
            CloneMode::Full { .. } => None,
        };
        if items.is_empty() && range.is_some() {
            report.abort(EMPTY_RANGE_REASON);
            return report;
        }

        report.total_examined = items.len();
        tracing::info!(
            user = job.user_id.0,
            source = job.source.0,
            destination = job.destination.0,
            total = items.len(),
            "clone started"
        );
        sink.report(&render_found(items.len(), range)).await;

        let checkpoint = job
            .mode
            .is_full()
            .then(|| Checkpoint::new(self.store.clone(), job.source, job.user_id));

        for (i, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                report.abort(CANCELLED_REASON);
                break;
            }

            if item.kind != ItemKind::Content {
                report.skipped += 1;
            } else {
                match self.copy_with_retry(transport, job, item.id, &pacer).await {
                    CopyOutcome::Cancelled => {
                        report.abort(CANCELLED_REASON);
                        break;
                    }
                    CopyOutcome::Done(Ok(())) => {
                        report.succeeded += 1;
                        if let Some(cp) = &checkpoint {
                            cp.record(item.id).await;
                        }
                    }
                    CopyOutcome::Done(Err(TransportError::ForwardingRestricted)) => {
                        report.failed += 1;
                        report.abort(FORWARDING_RESTRICTED_REASON);
                        tracing::warn!(user = job.user_id.0, source = job.source.0, "forwarding restricted, aborting");
                        break;
                    }
                    CopyOutcome::Done(Err(e)) => {
                        tracing::warn!(user = job.user_id.0, "copy of message {} failed: {e}", item.id.0);
                        report.record_failure(item.id.0, &e.to_string());
                    }
                }
            }

            let processed = report.processed();
            if self.settings.progress_every > 0 && processed % self.settings.progress_every == 0 {
                sink.report(&render_progress(&report)).await;
            }

            let is_last = i + 1 == items.len();
            if !is_last && !pacer.wait(self.settings.item_delay).await {
                report.abort(CANCELLED_REASON);
                break;
            }
        }

        tracing::info!(
            user = job.user_id.0,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            aborted = report.aborted,
            "clone finished"
        );
        report
    }

    /// Items to replicate, oldest first.
    async fn collect(
        &self,
        transport: &dyn ChannelTransport,
        job: &CloneJob,
        pacer: &Pacer<'_>,
    ) -> Result<Vec<HistoryItem>, Halt> {
        let page_size = self.settings.page_size.max(1);
        let mut items = Vec::new();

        let mut offset = match job.mode {
            CloneMode::Full { .. } => MessageId(0),
            CloneMode::Range(r) => MessageId(r.end().0.saturating_add(1)),
        };

        loop {
            let page = self.fetch_page(transport, job.source, offset, page_size, pacer).await?;
            let Some(last) = page.last() else {
                break;
            };
            offset = last.id;
            let short = page.len() < page_size;

            let mut reached_floor = false;
            for item in page {
                let keep = match job.mode {
                    CloneMode::Full { resume_after } => match resume_after {
                        Some(floor) if item.id <= floor => {
                            reached_floor = true;
                            break;
                        }
                        _ => true,
                    },
                    CloneMode::Range(r) => {
                        if item.id < r.start() {
                            reached_floor = true;
                            break;
                        }
                        r.contains(item.id)
                    }
                };
                if keep {
                    items.push(item);
                }
            }

            if reached_floor || short {
                break;
            }
        }

        items.reverse();
        Ok(items)
    }

    async fn fetch_page(
        &self,
        transport: &dyn ChannelTransport,
        channel: ChannelId,
        offset: MessageId,
        limit: usize,
        pacer: &Pacer<'_>,
    ) -> Result<Vec<HistoryItem>, Halt> {
        loop {
            if pacer.cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }
            match transport.history_page(channel, offset, limit).await {
                Ok(page) => return Ok(page),
                Err(TransportError::RateLimited(d)) => {
                    tracing::warn!(channel = channel.0, "history rate limited, sleeping {}s", d.as_secs());
                    if !pacer.wait(d).await {
                        return Err(Halt::Cancelled);
                    }
                }
                Err(e) => return Err(Halt::Failed(format!("Failed to read channel history: {e}"))),
            }
        }
    }

    async fn copy_with_retry(
        &self,
        transport: &dyn ChannelTransport,
        job: &CloneJob,
        id: MessageId,
        pacer: &Pacer<'_>,
    ) -> CopyOutcome {
        let mut retries = 0u32;
        loop {
            match transport.copy_message(job.source, job.destination, id).await {
                Err(TransportError::RateLimited(d)) => {
                    if self
                        .settings
                        .max_rate_limit_retries
                        .is_some_and(|max| retries >= max)
                    {
                        return CopyOutcome::Done(Err(TransportError::RateLimited(d)));
                    }
                    retries += 1;
                    tracing::warn!(user = job.user_id.0, "rate limited on message {}, sleeping {}s", id.0, d.as_secs());
                    if !pacer.wait(d).await {
                        return CopyOutcome::Cancelled;
                    }
                }
                other => return CopyOutcome::Done(other),
            }
        }
    }
}

/// Can the account read `channel` and copy its content?
pub async fn check_access(transport: &dyn ChannelTransport, channel: ChannelId) -> (bool, String) {
    match transport.channel_info(channel).await {
        Ok(info) if info.protected_content => (
            false,
            "This channel has protected content. Forwarding is not allowed.".to_string(),
        ),
        Ok(_) => (true, String::new()),
        Err(e) => {
            tracing::warn!(channel = channel.0, "access check failed: {e}");
            (false, format!("Cannot access channel: {e}"))
        }
    }
}

/// Can the account post into `channel`? Owners always can; admins only with
/// the post-messages right.
pub async fn check_post_permission(
    transport: &dyn ChannelTransport,
    channel: ChannelId,
) -> (bool, String) {
    if let Err(e) = transport.channel_info(channel).await {
        tracing::warn!(channel = channel.0, "post permission check failed: {e}");
        return (false, format!("Error accessing channel: {e}"));
    }

    match transport.membership(channel).await {
        Ok(Membership::Owner) | Ok(Membership::Admin { can_post: true }) => (true, String::new()),
        Ok(Membership::Admin { can_post: false }) => {
            (false, "No permission to post in this channel.".to_string())
        }
        Ok(Membership::Member) => (false, "Not an admin in this channel.".to_string()),
        Ok(Membership::NotMember) | Err(_) => (false, "Not a member of this channel.".to_string()),
    }
}
