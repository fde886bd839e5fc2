use std::{sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tcc_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use tcc_core::{
    auth::LoginManager, config::Config, domain::ChatId, engine::CloneEngine,
    formatting::escape_html, messaging::port::MessagingPort, pool::SessionPool,
    registry::TaskRegistry, store::SessionStore,
};

use crate::handlers;
use crate::TelegramMessenger;

/// Long-lived services built by the binary and shared with every handler.
#[derive(Clone)]
pub struct Services {
    pub logins: Arc<LoginManager>,
    pub pool: Arc<SessionPool>,
    pub engine: Arc<CloneEngine>,
    pub registry: TaskRegistry,
    pub store: Arc<dyn SessionStore>,
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub logins: Arc<LoginManager>,
    pub pool: Arc<SessionPool>,
    pub engine: Arc<CloneEngine>,
    pub registry: TaskRegistry,
    pub store: Arc<dyn SessionStore>,
}

/// Run the bot until the dispatcher stops (Ctrl-C).
pub async fn run_polling(cfg: Arc<Config>, services: Services) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    let username = match bot.get_me().await {
        Ok(me) => {
            let name = me.username().to_string();
            tracing::info!(bot = %name, "bot started");
            Some(name)
        }
        Err(e) => {
            tracing::warn!("get_me failed: {e}");
            None
        }
    };
    if cfg.allowed_users.is_empty() {
        tracing::info!("no allow-list configured, bot is open to everyone");
    } else {
        tracing::info!(allowed_users = cfg.allowed_users.len(), "allow-list active");
    }

    // Progress edits are frequent; throttle them on top of the adapter's
    // RetryAfter handling.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    if let Some(admin_id) = cfg.admin_id {
        let messenger = messenger.clone();
        let text = startup_text(username.as_deref(), cfg.allowed_users.len());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if let Err(e) = messenger.send_html(ChatId(admin_id), &text).await {
                tracing::warn!(admin_id, "startup notification failed: {e}");
            }
        });
    }

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        messenger,
        logins: services.logins,
        pool: services.pool,
        engine: services.engine,
        registry: services.registry,
        store: services.store,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            tracing::trace!(update_id = upd.id, "unhandled update");
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("dispatcher stopped");
    Ok(())
}

fn startup_text(username: Option<&str>, allowed_users: usize) -> String {
    let bot = username
        .map(|u| format!("@{}", escape_html(u)))
        .unwrap_or_else(|| "unknown".to_string());
    let access = if allowed_users == 0 {
        "everyone".to_string()
    } else {
        format!("{allowed_users} allowed user(s)")
    };
    format!("🤖 <b>Channel Cloner started</b>\n\nBot: {bot}\nAccess: {access}")
}
