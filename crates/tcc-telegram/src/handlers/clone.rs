//! `/clone` and `/clonerange`: pre-flight checks in the handler, the job
//! itself in a spawned task so `/cancel` keeps working while it runs.

use std::sync::Arc;

use tcc_core::{
    domain::{
        ChannelId, ChannelRef, ChatId, CloneJob, CloneMode, MessageLink, MessageRange, MessageRef,
        UserId,
    },
    engine::{check_access, check_post_permission},
    errors::CloneError,
    formatting::{code, escape_html},
    link::{parse_channel_ref, parse_message_link},
    ports::{ChannelTransport, NullSink},
    registry::TaskGuard,
    report::render_final,
};

use crate::{progress::StatusMessageSink, router::AppState};

use super::{
    commands::{LOGIN_FIRST, NO_DESTINATION},
    reply, update,
};

const ALREADY_ACTIVE: &str =
    "⚠️ You already have an active cloning task.\nUse /cancel to stop it first.";

/// Everything a job needs once the pre-flight checks passed.
struct Prepared {
    job: CloneJob,
    source_title: String,
    dest_title: String,
}

pub(super) async fn handle_clone(state: &Arc<AppState>, user: UserId, chat_id: ChatId, args: &str) {
    if state.registry.is_active(user) {
        reply(state, chat_id, ALREADY_ACTIVE).await;
        return;
    }

    let Some(transport) = state.pool.get(user).await else {
        reply(state, chat_id, &clone_error_text(&CloneError::NotLoggedIn)).await;
        return;
    };

    let Some((source, resume)) = parse_clone_args(args) else {
        reply(
            state,
            chat_id,
            "<b>Clone Channel</b>\n\n\
             Usage: <code>/clone &lt;source_id&gt; [resume]</code>\n\n\
             Example: <code>/clone -100123456789</code>\n\
             Add <code>resume</code> to continue after the last cloned message.\n\n\
             <b>First set destination:</b> <code>/setdest &lt;channel_id&gt;</code>",
        )
        .await;
        return;
    };

    let Some(dest) = destination(state, user, chat_id).await else {
        return;
    };

    let source_ref = match parse_channel_ref(source) {
        Ok(r) => r,
        Err(_) => {
            reply(
                state,
                chat_id,
                "❌ Invalid channel ID. Channel IDs should be numbers or public @usernames.",
            )
            .await;
            return;
        }
    };

    let status = reply(state, chat_id, "🔍 Checking access...").await;

    let prepared = match prepare_full(state, transport.as_ref(), user, &source_ref, dest, resume).await
    {
        Ok(p) => p,
        Err(e) => {
            update(state, status, chat_id, &clone_error_text(&e)).await;
            return;
        }
    };

    start(state, transport, prepared, status, chat_id).await;
}

pub(super) async fn handle_clone_range(
    state: &Arc<AppState>,
    user: UserId,
    chat_id: ChatId,
    args: &str,
) {
    if state.registry.is_active(user) {
        reply(state, chat_id, ALREADY_ACTIVE).await;
        return;
    }

    let Some(transport) = state.pool.get(user).await else {
        reply(state, chat_id, &clone_error_text(&CloneError::NotLoggedIn)).await;
        return;
    };

    let mut parts = args.split_whitespace();
    let (Some(start_link), Some(end_link)) = (parts.next(), parts.next()) else {
        reply(
            state,
            chat_id,
            "<b>Clone Range</b>\n\n\
             Usage: <code>/clonerange &lt;start_link&gt; &lt;end_link&gt;</code>\n\n\
             <b>Examples:</b>\n\
             • <code>/clonerange https://t.me/channel/100 https://t.me/channel/500</code>\n\
             • <code>/clonerange https://t.me/c/1234567890/100 https://t.me/c/1234567890/500</code>\n\n\
             <b>First set destination:</b> <code>/setdest &lt;channel_id&gt;</code>",
        )
        .await;
        return;
    };

    let Some(dest) = destination(state, user, chat_id).await else {
        return;
    };

    let start_link = match parse_message_link(start_link) {
        Ok(l) => l,
        Err(e) => {
            reply(state, chat_id, &invalid_link_text("start", &e.input)).await;
            return;
        }
    };
    let end_link = match parse_message_link(end_link) {
        Ok(l) => l,
        Err(e) => {
            reply(state, chat_id, &invalid_link_text("end", &e.input)).await;
            return;
        }
    };

    let status = reply(state, chat_id, "🔍 Resolving channels...").await;

    let prepared = match prepare_range(transport.as_ref(), user, &start_link, &end_link, dest).await {
        Ok(p) => p,
        Err(e) => {
            update(state, status, chat_id, &clone_error_text(&e)).await;
            return;
        }
    };

    start(state, transport, prepared, status, chat_id).await;
}

/// `<source> [resume]`
fn parse_clone_args(args: &str) -> Option<(&str, bool)> {
    let mut parts = args.split_whitespace();
    let source = parts.next()?;
    let resume = parts
        .next()
        .is_some_and(|flag| flag.eq_ignore_ascii_case("resume"));
    Some((source, resume))
}

/// Channel reference for each end of a range. A link without a channel
/// borrows it from the other link.
fn range_channels(
    start: &MessageLink,
    end: &MessageLink,
) -> Result<(ChannelRef, ChannelRef), CloneError> {
    match (&start.channel, &end.channel) {
        (Some(a), Some(b)) => Ok((a.clone(), b.clone())),
        (Some(a), None) | (None, Some(a)) => Ok((a.clone(), a.clone())),
        (None, None) => Err(CloneError::Resolve(
            "at least one link must name the channel".to_string(),
        )),
    }
}

async fn destination(state: &AppState, user: UserId, chat_id: ChatId) -> Option<ChannelId> {
    match state.store.get_destination(user).await {
        Ok(Some(d)) => Some(d),
        Ok(None) => {
            reply(state, chat_id, &clone_error_text(&CloneError::NoDestination)).await;
            None
        }
        Err(e) => {
            tracing::error!(user = user.0, "failed to read destination: {e}");
            reply(state, chat_id, "❌ Failed to read your destination. Please try again.").await;
            None
        }
    }
}

async fn prepare_full(
    state: &AppState,
    transport: &dyn ChannelTransport,
    user: UserId,
    source: &ChannelRef,
    dest: ChannelId,
    resume: bool,
) -> Result<Prepared, CloneError> {
    let source = resolve(transport, source).await?;

    let resume_after = if resume {
        match state.store.high_water_mark(source, user).await {
            Ok(mark) => mark,
            Err(e) => {
                tracing::warn!(user = user.0, source = source.0, "failed to read checkpoint: {e}");
                None
            }
        }
    } else {
        None
    };

    let (source_title, dest_title) = preflight(transport, source, dest).await?;
    Ok(Prepared {
        job: CloneJob::new(user, source, dest, CloneMode::Full { resume_after }),
        source_title,
        dest_title,
    })
}

async fn prepare_range(
    transport: &dyn ChannelTransport,
    user: UserId,
    start: &MessageLink,
    end: &MessageLink,
    dest: ChannelId,
) -> Result<Prepared, CloneError> {
    let (start_ref, end_ref) = range_channels(start, end)?;
    let source = resolve(transport, &start_ref).await?;
    if resolve(transport, &end_ref).await? != source {
        return Err(CloneError::ChannelMismatch);
    }

    let range = MessageRange::new(start.message_id, end.message_id);
    let (source_title, dest_title) = preflight(transport, source, dest).await?;
    Ok(Prepared {
        job: CloneJob::new(user, source, dest, CloneMode::Range(range)),
        source_title,
        dest_title,
    })
}

/// Source readable, destination writable; returns both titles.
async fn preflight(
    transport: &dyn ChannelTransport,
    source: ChannelId,
    dest: ChannelId,
) -> Result<(String, String), CloneError> {
    let (ok, reason) = check_access(transport, source).await;
    if !ok {
        return Err(CloneError::ChannelAccess(reason));
    }
    let (ok, reason) = check_post_permission(transport, dest).await;
    if !ok {
        return Err(CloneError::PostPermission(reason));
    }

    Ok((title(transport, source).await, title(transport, dest).await))
}

async fn resolve(transport: &dyn ChannelTransport, channel: &ChannelRef) -> Result<ChannelId, CloneError> {
    transport
        .resolve_channel(channel)
        .await
        .map_err(|e| CloneError::Resolve(format!("{channel}: {e}")))
}

async fn title(transport: &dyn ChannelTransport, channel: ChannelId) -> String {
    transport
        .channel_info(channel)
        .await
        .map(|i| i.title)
        .unwrap_or_else(|_| channel.to_string())
}

async fn start(
    state: &Arc<AppState>,
    transport: Arc<dyn ChannelTransport>,
    prepared: Prepared,
    status: Option<MessageRef>,
    chat_id: ChatId,
) {
    let user = prepared.job.user_id;
    let guard = match state.registry.try_start(user, job_label(&prepared)) {
        Ok(g) => g,
        Err(_) => {
            update(state, status, chat_id, ALREADY_ACTIVE).await;
            return;
        }
    };

    update(state, status, chat_id, &starting_text(&prepared)).await;

    // Without a status message there is nothing to edit; progress goes to a fresh one.
    let status = match status {
        Some(s) => Some(s),
        None => reply(state, chat_id, "⏳ Cloning...").await,
    };

    let state = state.clone();
    tokio::spawn(async move {
        run_job(state, transport, prepared, guard, status, chat_id).await;
    });
}

async fn run_job(
    state: Arc<AppState>,
    transport: Arc<dyn ChannelTransport>,
    prepared: Prepared,
    guard: TaskGuard,
    status: Option<MessageRef>,
    chat_id: ChatId,
) {
    let job = &prepared.job;
    let token = guard.token();
    tracing::info!(
        user = job.user_id.0,
        source = job.source.0,
        destination = job.destination.0,
        full = job.mode.is_full(),
        "clone job started"
    );

    let report = match status {
        Some(msg) => {
            let sink = StatusMessageSink::new(state.messenger.clone(), msg, token.clone());
            state.engine.run(transport.as_ref(), job, &sink, &token).await
        }
        None => {
            state
                .engine
                .run(transport.as_ref(), job, &NullSink, &token)
                .await
        }
    };

    tracing::info!(
        user = job.user_id.0,
        source = job.source.0,
        examined = report.total_examined,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        aborted = report.aborted,
        "clone job finished"
    );

    // Free the slot before the summary goes out so a new job can start right away.
    drop(guard);

    let summary = render_final(&report, &prepared.source_title, &prepared.dest_title);
    update(&state, status, chat_id, &summary).await;
}

fn job_label(p: &Prepared) -> String {
    match p.job.mode {
        CloneMode::Full { resume_after: None } => format!("clone {}", p.source_title),
        CloneMode::Full {
            resume_after: Some(after),
        } => format!("clone {} (after #{})", p.source_title, after.0),
        CloneMode::Range(r) => format!(
            "clone {} #{}-#{}",
            p.source_title,
            r.start().0,
            r.end().0
        ),
    }
}

fn starting_text(p: &Prepared) -> String {
    let mut out = format!(
        "🚀 <b>Starting Clone</b>\n\n📤 Source: {}\n📥 Destination: {}\n👤 Using: Your account\n",
        escape_html(&p.source_title),
        escape_html(&p.dest_title)
    );
    match p.job.mode {
        CloneMode::Full {
            resume_after: Some(after),
        } => out.push_str(&format!("⏩ Resuming after message {}\n", after.0)),
        CloneMode::Range(r) => out.push_str(&format!(
            "📍 Range: {} - {}\n",
            r.start().0,
            r.end().0
        )),
        CloneMode::Full { resume_after: None } => {}
    }
    out.push_str("\n⏳ This may take a while...");
    out
}

fn invalid_link_text(which: &str, input: &str) -> String {
    format!(
        "❌ Invalid {which} link: {}\n\nPlease use a valid Telegram message link.",
        code(input)
    )
}

fn clone_error_text(e: &CloneError) -> String {
    match e {
        CloneError::NotLoggedIn => LOGIN_FIRST.to_string(),
        CloneError::NoDestination => NO_DESTINATION.to_string(),
        CloneError::ChannelAccess(reason) => format!(
            "❌ <b>Cannot clone this channel!</b>\n\n{}",
            escape_html(reason)
        ),
        CloneError::PostPermission(reason) => format!(
            "❌ <b>Cannot post to destination!</b>\n\n{}\n\n\
             Make sure you are an admin in the destination channel.",
            escape_html(reason)
        ),
        CloneError::ChannelMismatch => {
            "❌ Start and end links must be from the <b>same channel</b>.".to_string()
        }
        CloneError::Resolve(detail) => {
            format!("❌ Could not resolve channel: {}", escape_html(detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcc_core::domain::MessageId;

    fn link(channel: Option<ChannelRef>, id: i32) -> MessageLink {
        MessageLink {
            channel,
            message_id: MessageId(id),
        }
    }

    fn prepared(mode: CloneMode) -> Prepared {
        Prepared {
            job: CloneJob::new(UserId(1), ChannelId(-1001), ChannelId(-1002), mode),
            source_title: "News <daily>".to_string(),
            dest_title: "Backup".to_string(),
        }
    }

    #[test]
    fn clone_args() {
        assert_eq!(parse_clone_args("-100123"), Some(("-100123", false)));
        assert_eq!(parse_clone_args("-100123 resume"), Some(("-100123", true)));
        assert_eq!(parse_clone_args("@news RESUME"), Some(("@news", true)));
        assert_eq!(parse_clone_args("@news later"), Some(("@news", false)));
        assert_eq!(parse_clone_args("   "), None);
    }

    #[test]
    fn range_links_share_a_channel() {
        let named = ChannelRef::Username("news".to_string());

        let (a, b) = range_channels(&link(Some(named.clone()), 10), &link(None, 20)).unwrap();
        assert_eq!((a, b), (named.clone(), named.clone()));

        let (a, b) = range_channels(&link(None, 10), &link(Some(named.clone()), 20)).unwrap();
        assert_eq!((a, b), (named.clone(), named));

        assert!(matches!(
            range_channels(&link(None, 10), &link(None, 20)),
            Err(CloneError::Resolve(_))
        ));
    }

    #[test]
    fn range_keeps_distinct_references_for_resolution() {
        let a = ChannelRef::Username("one".to_string());
        let b = ChannelRef::Id(ChannelId(-1002));
        let (x, y) = range_channels(&link(Some(a.clone()), 1), &link(Some(b.clone()), 2)).unwrap();
        assert_eq!(x, a);
        assert_eq!(y, b);
    }

    #[test]
    fn labels_and_start_text_follow_mode() {
        let full = prepared(CloneMode::Full { resume_after: None });
        assert_eq!(job_label(&full), "clone News <daily>");
        assert!(starting_text(&full).contains("News &lt;daily&gt;"));
        assert!(!starting_text(&full).contains("Resuming"));

        let resumed = prepared(CloneMode::Full {
            resume_after: Some(MessageId(41)),
        });
        assert!(job_label(&resumed).contains("after #41"));
        assert!(starting_text(&resumed).contains("Resuming after message 41"));

        let range = prepared(CloneMode::Range(MessageRange::new(
            MessageId(500),
            MessageId(100),
        )));
        assert_eq!(job_label(&range), "clone News <daily> #100-#500");
        assert!(starting_text(&range).contains("Range: 100 - 500"));
    }

    #[test]
    fn error_texts_escape_reasons() {
        let text = clone_error_text(&CloneError::PostPermission("<no>".to_string()));
        assert!(text.contains("&lt;no&gt;"));
        assert!(text.contains("admin"));
        assert!(clone_error_text(&CloneError::ChannelMismatch).contains("same channel"));
        assert_eq!(clone_error_text(&CloneError::NoDestination), NO_DESTINATION);
        assert_eq!(clone_error_text(&CloneError::NotLoggedIn), LOGIN_FIRST);
        assert!(invalid_link_text("start", "foo").contains("<code>foo</code>"));
    }
}
