use std::sync::Arc;

use chrono::{DateTime, Utc};

use tcc_core::{
    auth::LoginPhase,
    domain::{AccountInfo, ChannelId, ChatId, MessageRef, UserId},
    engine::check_post_permission,
    formatting::{code, escape_html, format_elapsed},
    link::parse_channel_ref,
    registry::TaskStatus,
};

use crate::router::AppState;

use super::{clone, login, reply, update};

pub(super) const LOGIN_FIRST: &str = "❌ <b>Please login first!</b>\n\n\
Use <code>/login +1234567890</code> to login with your phone number.\n\
Your account will be used for cloning.";

pub(super) const NO_DESTINATION: &str = "❌ <b>No destination set!</b>\n\n\
First set your destination channel:\n<code>/setdest -100123456789</code>";

const START_TEXT: &str = "👋 <b>Channel Cloner</b>\n\n\
Welcome! I can clone Telegram channels without the \"Forwarded from\" tag.\n\n\
<b>How it works:</b>\n\
1. Login with your Telegram account: /login\n\
2. Set the destination channel: /setdest\n\
3. Start cloning: /clone or /clonerange\n\n\
Send /help for all commands.";

const HELP_TEXT: &str = "📖 <b>Channel Cloner Help</b>\n\n\
<b>Quick Start:</b>\n\
1. <code>/login +1234567890</code>\n\
2. <code>/code 1 2 3 4 5</code> (and <code>/2fa password</code> if asked)\n\
3. <code>/setdest -100123456789</code>\n\
4. <code>/clone -100987654321</code>\n\n\
<b>Account:</b>\n\
/login &lt;phone&gt; - Login with your phone number\n\
/code &lt;code&gt; - Submit the login code (alias /otp)\n\
/2fa &lt;password&gt; - Submit your two-step password\n\
/logout - Remove your saved session\n\
/status - Show login, destination and job status\n\n\
<b>Destination:</b>\n\
/setdest &lt;channel&gt; - Set the destination channel\n\
/getdest - Show the current destination\n\
/cleardest - Forget the destination\n\n\
<b>Cloning:</b>\n\
/clone &lt;source&gt; [resume] - Clone a whole channel\n\
/clonerange &lt;start_link&gt; &lt;end_link&gt; - Clone a range of posts (alias /crange)\n\
/cancel - Stop the running clone or pending login\n\n\
<b>Notes:</b>\n\
• Messages are copied (not forwarded), so there is no \"Forwarded from\" tag\n\
• Your account must read the source and be allowed to post in the destination\n\
• Channels with protected content cannot be cloned\n\
• Get a channel ID: forward any message from the channel to @RawDataBot";

pub(super) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub(super) async fn handle_command(state: &Arc<AppState>, user: UserId, msg: MessageRef, text: &str) {
    let (cmd, args) = parse_command(text);
    let chat_id = msg.chat_id;
    tracing::info!(user = user.0, command = %cmd, "command received");

    match cmd.as_str() {
        "start" => {
            reply(state, chat_id, START_TEXT).await;
        }
        "help" => {
            reply(state, chat_id, HELP_TEXT).await;
        }
        "login" => login::handle_login(state, user, chat_id, &args).await,
        "code" | "otp" => login::handle_code(state, user, chat_id, &args).await,
        "2fa" => login::handle_password(state, user, msg, &args).await,
        "logout" => handle_logout(state, user, chat_id).await,
        "setdest" => handle_setdest(state, user, chat_id, &args).await,
        "getdest" => handle_getdest(state, user, chat_id).await,
        "cleardest" => handle_cleardest(state, user, chat_id).await,
        "clone" => clone::handle_clone(state, user, chat_id, &args).await,
        "clonerange" | "crange" => clone::handle_clone_range(state, user, chat_id, &args).await,
        "cancel" => handle_cancel(state, user, chat_id).await,
        "status" => handle_status(state, user, chat_id).await,
        _ => {
            reply(
                state,
                chat_id,
                "❓ Unknown command. Send /help for the list of commands.",
            )
            .await;
        }
    }
}

async fn handle_logout(state: &AppState, user: UserId, chat_id: ChatId) {
    if state.registry.cancel(user) {
        tracing::info!(user = user.0, "clone cancelled by logout");
    }
    let _ = state.logins.cancel(user).await;

    let text = match state.pool.logout(user).await {
        Ok(true) => "✅ Logged out successfully. Your session was removed.".to_string(),
        Ok(false) => "ℹ️ You were not logged in.".to_string(),
        Err(e) => {
            tracing::error!(user = user.0, "logout failed: {e}");
            format!("❌ Failed to remove your session: {}", escape_html(&e.to_string()))
        }
    };
    reply(state, chat_id, &text).await;
}

async fn handle_setdest(state: &AppState, user: UserId, chat_id: ChatId, args: &str) {
    if args.is_empty() {
        reply(
            state,
            chat_id,
            "<b>Set Destination Channel</b>\n\n\
             Usage: <code>/setdest -100123456789</code>\n\n\
             You must be an admin in the destination channel with posting permission.\n\n\
             <b>Get channel ID:</b> Forward any message from the channel to @RawDataBot",
        )
        .await;
        return;
    }

    let Some(transport) = state.pool.get(user).await else {
        reply(state, chat_id, LOGIN_FIRST).await;
        return;
    };

    let channel_ref = match parse_channel_ref(args) {
        Ok(r) => r,
        Err(_) => {
            reply(
                state,
                chat_id,
                "❌ Invalid channel ID. Use a number starting with -100 or a public @username.",
            )
            .await;
            return;
        }
    };

    let status = reply(state, chat_id, "🔍 Checking destination...").await;

    let dest = match transport.resolve_channel(&channel_ref).await {
        Ok(id) => id,
        Err(e) => {
            let text = format!("❌ Could not resolve channel: {}", escape_html(&e.to_string()));
            update(state, status, chat_id, &text).await;
            return;
        }
    };

    let (ok, reason) = check_post_permission(transport.as_ref(), dest).await;
    if !ok {
        let text = format!(
            "❌ Cannot use this channel as destination.\n\n{}\n\n\
             Make sure you are an admin with post permission.",
            escape_html(&reason)
        );
        update(state, status, chat_id, &text).await;
        return;
    }

    let title = match transport.channel_info(dest).await {
        Ok(info) => info.title,
        Err(_) => dest.to_string(),
    };

    let text = match state.store.set_destination(user, dest).await {
        Ok(()) => {
            tracing::info!(user = user.0, destination = dest.0, "destination set");
            format!(
                "✅ <b>Destination Set!</b>\n\n📥 Channel: {}\n🆔 ID: {}\n\n\
                 All your cloned messages will be sent here.",
                escape_html(&title),
                code(&dest.to_string())
            )
        }
        Err(e) => {
            tracing::error!(user = user.0, "failed to save destination: {e}");
            "❌ Failed to save destination. Please try again.".to_string()
        }
    };
    update(state, status, chat_id, &text).await;
}

async fn handle_getdest(state: &AppState, user: UserId, chat_id: ChatId) {
    let dest = match state.store.get_destination(user).await {
        Ok(Some(d)) => d,
        Ok(None) => {
            reply(
                state,
                chat_id,
                "❌ <b>No destination set</b>\n\n\
                 Use <code>/setdest -100123456789</code> to set your destination channel.",
            )
            .await;
            return;
        }
        Err(e) => {
            tracing::error!(user = user.0, "failed to read destination: {e}");
            reply(state, chat_id, "❌ Failed to read your destination. Please try again.").await;
            return;
        }
    };

    let title = match state.pool.get(user).await {
        Some(t) => t.channel_info(dest).await.ok().map(|i| i.title),
        None => None,
    };
    reply(state, chat_id, &destination_text(dest, title.as_deref())).await;
}

async fn handle_cleardest(state: &AppState, user: UserId, chat_id: ChatId) {
    let text = match state.store.clear_destination(user).await {
        Ok(true) => "✅ Destination cleared.",
        Ok(false) => "ℹ️ No destination was set.",
        Err(e) => {
            tracing::error!(user = user.0, "failed to clear destination: {e}");
            "❌ Failed to clear destination. Please try again."
        }
    };
    reply(state, chat_id, text).await;
}

async fn handle_cancel(state: &AppState, user: UserId, chat_id: ChatId) {
    if state.registry.cancel(user) {
        tracing::info!(user = user.0, "clone cancel requested");
        reply(state, chat_id, "✅ Cloning task cancelled.").await;
        return;
    }
    if state.logins.cancel(user).await.is_ok() {
        reply(state, chat_id, "✅ Pending login cancelled.").await;
        return;
    }
    reply(state, chat_id, "❌ No active cloning task to cancel.").await;
}

async fn handle_status(state: &AppState, user: UserId, chat_id: ChatId) {
    let mut sections = Vec::new();

    match state.logins.phase(user).await {
        Some(LoginPhase::CodeSent) => {
            sections.push("⏳ Login in progress: waiting for the code (/code).".to_string())
        }
        Some(LoginPhase::AwaitingPassword) => {
            sections.push("⏳ Login in progress: waiting for the 2FA password (/2fa).".to_string())
        }
        None => {}
    }

    match state.pool.get(user).await {
        Some(transport) => match transport.whoami().await {
            Ok(me) => sections.push(account_text(&me)),
            Err(e) => sections.push(format!(
                "⚠️ Session exists but error getting info: {}",
                escape_html(&e.to_string())
            )),
        },
        None => sections.push(
            "❌ <b>Not logged in</b>\n\nUse <code>/login &lt;phone&gt;</code> to login with your phone number."
                .to_string(),
        ),
    }

    match state.store.get_destination(user).await {
        Ok(Some(dest)) => sections.push(format!("📥 Destination: {}", code(&dest.to_string()))),
        Ok(None) => sections.push("📥 Destination: not set".to_string()),
        Err(e) => tracing::warn!(user = user.0, "failed to read destination: {e}"),
    }

    sections.push(match state.registry.status(user) {
        Some(job) => job_text(&job, Utc::now()),
        None => "💤 No active clone job.".to_string(),
    });

    reply(state, chat_id, &sections.join("\n\n")).await;
}

fn destination_text(dest: ChannelId, title: Option<&str>) -> String {
    match title {
        Some(title) => format!(
            "📥 <b>Current Destination</b>\n\nChannel: {}\nID: {}\n\n\
             Use <code>/setdest &lt;new_id&gt;</code> to change.",
            escape_html(title),
            code(&dest.to_string())
        ),
        None => format!(
            "📥 <b>Current Destination</b>\n\nID: {}\n\
             ⚠️ Could not get channel info\n\n\
             Use <code>/setdest &lt;new_id&gt;</code> to change.",
            code(&dest.to_string())
        ),
    }
}

fn account_text(me: &AccountInfo) -> String {
    let username = me
        .username
        .as_deref()
        .map(|u| format!("@{}", escape_html(u)))
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "✅ <b>Logged in as:</b>\n• Name: {}\n• Username: {}\n• User ID: {}",
        escape_html(&me.display_name()),
        username,
        code(&me.id.to_string())
    )
}

fn job_text(job: &TaskStatus, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(job.started_at).num_seconds().max(0) as u64;
    let mut out = format!(
        "🔄 <b>Active job:</b> {}\n⏱ Running for {}",
        escape_html(&job.label),
        format_elapsed(secs)
    );
    if job.cancelled {
        out.push_str("\n🛑 Cancelling...");
    }
    out
}
