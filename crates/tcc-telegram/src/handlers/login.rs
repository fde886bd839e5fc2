use tcc_core::{
    auth::LoginStep,
    domain::{ChatId, MessageRef, UserId},
    errors::LoginError,
    formatting::{code, escape_html},
};

use crate::router::AppState;

use super::reply;

pub(super) async fn handle_login(state: &AppState, user: UserId, chat_id: ChatId, args: &str) {
    match state.store.get_session(user).await {
        Ok(Some(_)) => {
            reply(state, chat_id, &login_error_text(&LoginError::AlreadyLoggedIn)).await;
            return;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(user = user.0, "failed to read session: {e}"),
    }

    if args.is_empty() {
        reply(
            state,
            chat_id,
            "📱 <b>Login with Phone Number</b>\n\n\
             Usage: <code>/login +1234567890</code>\n\n\
             Include the country code (e.g., +1 for US, +91 for India)",
        )
        .await;
        return;
    }

    reply(state, chat_id, "📲 Sending login code...").await;

    let text = match state.logins.initiate(user, args).await {
        Ok(step) => step_text(&step),
        Err(e) => login_error_text(&e),
    };
    reply(state, chat_id, &text).await;
}

pub(super) async fn handle_code(state: &AppState, user: UserId, chat_id: ChatId, args: &str) {
    if args.is_empty() {
        reply(state, chat_id, "Usage: <code>/code 1 2 3 4 5</code>").await;
        return;
    }

    let text = match state.logins.submit_code(user, args).await {
        Ok(step) => step_text(&step),
        Err(e) => login_error_text(&e),
    };
    reply(state, chat_id, &text).await;
}

/// The message carrying the password is deleted before anything else.
pub(super) async fn handle_password(state: &AppState, user: UserId, msg: MessageRef, args: &str) {
    if let Err(e) = state.messenger.delete_message(msg).await {
        tracing::debug!(user = user.0, "could not delete password message: {e}");
    }

    if args.is_empty() {
        reply(state, msg.chat_id, "Usage: <code>/2fa your_password</code>").await;
        return;
    }

    let text = match state.logins.submit_password(user, args).await {
        Ok(step) => step_text(&step),
        Err(e) => login_error_text(&e),
    };
    reply(state, msg.chat_id, &text).await;
}

fn step_text(step: &LoginStep) -> String {
    match step {
        LoginStep::CodeRequested { phone } => format!(
            "✅ Code sent to {}\n\n\
             Reply with the code you received, with spaces between the digits \
             so Telegram does not block it:\n<code>/code 1 2 3 4 5</code>",
            code(phone)
        ),
        LoginStep::PasswordRequired { hint } => {
            let hint = hint
                .as_deref()
                .filter(|h| !h.is_empty())
                .map(|h| format!("\nHint: {}", escape_html(h)))
                .unwrap_or_default();
            format!(
                "🔐 Two-step verification is enabled.{hint}\n\n\
                 Reply with: <code>/2fa your_password</code>"
            )
        }
        LoginStep::Authenticated => "✅ <b>Login successful!</b>\n\n\
             Next, set your destination with <code>/setdest -100123456789</code>."
            .to_string(),
    }
}

fn login_error_text(e: &LoginError) -> String {
    match e {
        LoginError::NoPendingLogin => {
            "❌ No pending login found. Please start with /login first.".to_string()
        }
        LoginError::AlreadyLoggedIn => {
            "✅ You're already logged in! Use /logout to logout first.".to_string()
        }
        LoginError::LoginInProgress => {
            "⏳ A login is already in progress. Finish it, or use /cancel to start over."
                .to_string()
        }
        LoginError::WrongPhase { expected } => {
            format!("❌ Your login is not waiting for {expected} right now. Check /status.")
        }
        LoginError::InvalidPhone => "❌ Invalid phone number. Include the country code, \
             e.g. <code>/login +1234567890</code>"
            .to_string(),
        LoginError::RateLimited(d) => {
            format!("⏳ Too many attempts. Please wait {} seconds.", d.as_secs())
        }
        LoginError::InvalidCode => "❌ Invalid OTP code. Please try again.".to_string(),
        LoginError::CodeExpired => {
            "❌ OTP code expired. Please start login again with /login.".to_string()
        }
        LoginError::InvalidPassword => "❌ Invalid 2FA password. Please try again.".to_string(),
        LoginError::SignUpRequired => {
            "❌ This phone number is not registered on Telegram.".to_string()
        }
        LoginError::Expired => {
            "⌛ Login attempt timed out. Please start again with /login.".to_string()
        }
        LoginError::Transport(detail) => format!("❌ Login failed: {}", escape_html(detail)),
        LoginError::Storage(err) => format!(
            "❌ Logged in, but the session could not be saved: {}",
            escape_html(&err.to_string())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn password_prompt_includes_non_empty_hint() {
        let text = step_text(&LoginStep::PasswordRequired {
            hint: Some("pet <name>".to_string()),
        });
        assert!(text.contains("Hint: pet &lt;name&gt;"));

        let text = step_text(&LoginStep::PasswordRequired {
            hint: Some(String::new()),
        });
        assert!(!text.contains("Hint"));
    }

    #[test]
    fn code_prompt_shows_normalized_phone() {
        let text = step_text(&LoginStep::CodeRequested {
            phone: "+15551234567".to_string(),
        });
        assert!(text.contains("<code>+15551234567</code>"));
        assert!(text.contains("/code"));
    }

    #[test]
    fn error_texts_are_specific() {
        assert_eq!(
            login_error_text(&LoginError::RateLimited(Duration::from_secs(120))),
            "⏳ Too many attempts. Please wait 120 seconds."
        );
        assert!(login_error_text(&LoginError::CodeExpired).contains("/login"));
        assert!(login_error_text(&LoginError::NoPendingLogin).contains("/login"));
        assert_ne!(
            login_error_text(&LoginError::InvalidCode),
            login_error_text(&LoginError::InvalidPassword)
        );
        assert!(login_error_text(&LoginError::WrongPhase { expected: "a password" })
            .contains("a password"));
        assert_eq!(
            login_error_text(&LoginError::Transport("<boom>".to_string())),
            "❌ Login failed: &lt;boom&gt;"
        );
    }
}
