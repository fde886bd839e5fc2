//! Phone-number login flow.
//!
//! One in-flight attempt per user:
//! `initiate` -> `CodeSent` -> (`AwaitingPassword`) -> authenticated.
//! The attempt owns its own unauthenticated connection, because the code
//! challenge is bound to it; the connection is closed on every exit path.

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::{
    domain::UserId,
    errors::{LoginError, TransportError},
    pool::SessionPool,
    ports::{CodeOutcome, LoginConnection, LoginConnector},
    slots::KeyedSlots,
    store::SessionStore,
};

pub type LoginResult<T> = std::result::Result<T, LoginError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginPhase {
    CodeSent,
    AwaitingPassword,
}

/// Successful outcome of a login step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginStep {
    CodeRequested { phone: String },
    PasswordRequired { hint: Option<String> },
    Authenticated,
}

struct AuthSession {
    phone: String,
    phase: LoginPhase,
    connection: Box<dyn LoginConnection>,
    started_at: Instant,
}

pub struct LoginManager {
    connector: Arc<dyn LoginConnector>,
    store: Arc<dyn SessionStore>,
    pool: Arc<SessionPool>,
    timeout: Duration,
    attempts: KeyedSlots<UserId, AuthSession>,
}

impl LoginManager {
    pub fn new(
        connector: Arc<dyn LoginConnector>,
        store: Arc<dyn SessionStore>,
        pool: Arc<SessionPool>,
        timeout: Duration,
    ) -> Self {
        Self {
            connector,
            store,
            pool,
            timeout,
            attempts: KeyedSlots::new(),
        }
    }

    pub async fn initiate(&self, user: UserId, phone: &str) -> LoginResult<LoginStep> {
        let mut slot = self.attempts.lock(&user).await;
        let _ = self.expire_stale(user, &mut slot).await;

        if slot.is_some() {
            return match self.store.get_session(user).await {
                Ok(Some(_)) => Err(LoginError::AlreadyLoggedIn),
                _ => Err(LoginError::LoginInProgress),
            };
        }

        let phone = normalize_phone(phone).ok_or(LoginError::InvalidPhone)?;
        let mut connection = self.connector.connect(user).await.map_err(LoginError::from)?;

        if let Err(e) = connection.request_code(&phone).await {
            connection.close().await;
            tracing::warn!(user = user.0, "code request failed: {e}");
            return Err(e.into());
        }

        tracing::info!(user = user.0, "login code sent");
        *slot = Some(AuthSession {
            phone: phone.clone(),
            phase: LoginPhase::CodeSent,
            connection,
            started_at: Instant::now(),
        });
        Ok(LoginStep::CodeRequested { phone })
    }

    pub async fn submit_code(&self, user: UserId, code: &str) -> LoginResult<LoginStep> {
        let mut slot = self.attempts.lock(&user).await;
        self.expire_stale(user, &mut slot).await?;

        let session = slot.as_mut().ok_or(LoginError::NoPendingLogin)?;
        if session.phase != LoginPhase::CodeSent {
            return Err(LoginError::WrongPhase { expected: "a code" });
        }

        let code: String = code.chars().filter(|c| !c.is_whitespace()).collect();
        match session.connection.submit_code(&code).await {
            Ok(CodeOutcome::Authorized) => self.finalize(user, &mut slot).await,
            Ok(CodeOutcome::PasswordRequired { hint }) | Err(TransportError::PasswordRequired { hint }) => {
                session.phase = LoginPhase::AwaitingPassword;
                tracing::info!(user = user.0, "two-factor password required");
                Ok(LoginStep::PasswordRequired { hint })
            }
            Err(e @ (TransportError::CodeExpired | TransportError::SignUpRequired)) => {
                discard(user, &mut slot).await;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn submit_password(&self, user: UserId, password: &str) -> LoginResult<LoginStep> {
        let mut slot = self.attempts.lock(&user).await;
        self.expire_stale(user, &mut slot).await?;

        let session = slot.as_mut().ok_or(LoginError::NoPendingLogin)?;
        if session.phase != LoginPhase::AwaitingPassword {
            return Err(LoginError::WrongPhase { expected: "a password" });
        }

        session
            .connection
            .submit_password(password)
            .await
            .map_err(LoginError::from)?;
        self.finalize(user, &mut slot).await
    }

    /// Abandon the in-flight attempt. Durable state is untouched.
    pub async fn cancel(&self, user: UserId) -> LoginResult<()> {
        let mut slot = self.attempts.lock(&user).await;
        if slot.is_none() {
            return Err(LoginError::NoPendingLogin);
        }
        discard(user, &mut slot).await;
        tracing::info!(user = user.0, "login cancelled");
        Ok(())
    }

    pub async fn phase(&self, user: UserId) -> Option<LoginPhase> {
        let mut slot = self.attempts.lock(&user).await;
        let _ = self.expire_stale(user, &mut slot).await;
        slot.as_ref().map(|s| s.phase)
    }

    /// Close every in-flight connection. Used at shutdown only.
    pub async fn abort_all(&self) {
        for (user, mut session) in self.attempts.drain().await {
            session.connection.close().await;
            tracing::info!(user = user.0, "pending login aborted");
        }
    }

    async fn finalize(
        &self,
        user: UserId,
        slot: &mut Option<AuthSession>,
    ) -> LoginResult<LoginStep> {
        let Some(mut session) = slot.take() else {
            return Err(LoginError::NoPendingLogin);
        };

        let blob = match session.connection.export_session().await {
            Ok(b) => b,
            Err(e) => {
                session.connection.close().await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.put_session(user, &session.phone, blob).await {
            tracing::error!(user = user.0, "failed to persist session: {e}");
            session.connection.close().await;
            return Err(LoginError::Storage(e));
        }

        self.pool
            .publish(user, session.connection.into_transport())
            .await;
        tracing::info!(user = user.0, "login complete");
        Ok(LoginStep::Authenticated)
    }

    /// Drop an attempt older than the login timeout.
    async fn expire_stale(&self, user: UserId, slot: &mut Option<AuthSession>) -> LoginResult<()> {
        let stale = slot
            .as_ref()
            .is_some_and(|s| s.started_at.elapsed() >= self.timeout);
        if stale {
            discard(user, slot).await;
            tracing::info!(user = user.0, "login attempt expired");
            return Err(LoginError::Expired);
        }
        Ok(())
    }
}

async fn discard(user: UserId, slot: &mut Option<AuthSession>) {
    if let Some(mut session) = slot.take() {
        session.connection.close().await;
        tracing::debug!(user = user.0, phone = %mask_phone(&session.phone), "login attempt discarded");
    }
}

/// Strip formatting and ensure a leading `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("+{digits}"))
}

fn mask_phone(phone: &str) -> String {
    let keep = phone.chars().rev().take(2).collect::<Vec<_>>();
    let tail: String = keep.into_iter().rev().collect();
    format!("***{tail}")
}
