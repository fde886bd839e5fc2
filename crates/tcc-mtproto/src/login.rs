use std::{
    ops::ControlFlow,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use layer_client::{
    BinaryFileBackend, Client, Config, LoginToken, NoRetries, PasswordToken, RetryContext,
    RetryPolicy, SignInError,
};
use tcc_core::{
    domain::UserId,
    errors::TransportError,
    ports::{ChannelTransport, CodeOutcome, LoginConnection, LoginConnector, TransportResult},
    store::SessionBlob,
};

use crate::{errors::classify, transport::MtprotoTransport};

/// Opens MTProto user-account connections.
///
/// Each user gets their own session file under `session_dir`; the file is
/// the working copy of the blob kept in the session store.
pub struct MtprotoConnector {
    api_id: i32,
    api_hash: String,
    session_dir: PathBuf,
}

impl MtprotoConnector {
    pub fn new(api_id: i32, api_hash: impl Into<String>, session_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            session_dir: session_dir.into(),
        }
    }

    fn session_path(&self, user: UserId) -> PathBuf {
        self.session_dir.join(format!("{}.session", user.0))
    }

    async fn open(&self, path: &Path, retry_policy: Arc<dyn RetryPolicy>) -> TransportResult<Client> {
        let config = Config {
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            // Rate limits are surfaced to the caller, which owns the waiting.
            retry_policy,
            session_backend: Arc::new(BinaryFileBackend::new(path)),
            ..Default::default()
        };
        Client::connect(config)
            .await
            .map(|(client, _shutdown)| client)
            .map_err(|e| classify(&e))
    }
}

#[async_trait]
impl LoginConnector for MtprotoConnector {
    async fn connect(&self, user: UserId) -> TransportResult<Box<dyn LoginConnection>> {
        let path = self.session_path(user);
        remove_if_exists(&path).await?;

        let failures = Arc::new(LastFailure::default());
        let client = self.open(&path, failures.clone()).await?;
        tracing::info!(user = user.0, "login connection opened");
        Ok(Box::new(MtprotoLogin {
            client,
            user,
            path,
            failures,
            token: None,
            code: None,
            password: None,
        }))
    }

    async fn restore(
        &self,
        user: UserId,
        blob: &SessionBlob,
    ) -> TransportResult<Arc<dyn ChannelTransport>> {
        let path = self.session_path(user);
        tokio::fs::write(&path, &blob.0)
            .await
            .map_err(|e| TransportError::Other(format!("failed to write session file: {e}")))?;

        let client = self.open(&path, Arc::new(NoRetries)).await?;
        match client.is_authorized().await {
            Ok(true) => Ok(Arc::new(MtprotoTransport::new(client, user))),
            Ok(false) => Err(TransportError::Unauthorized),
            Err(e) => Err(classify(&e)),
        }
    }
}

/// Never retries, but remembers how the last failed call was classified.
///
/// `Client::sign_in` reports every `PHONE_CODE_*` error as `InvalidCode`; the
/// retry policy still sees the raw RPC error, which keeps an expired code
/// apart from a mistyped one.
#[derive(Default)]
struct LastFailure(Mutex<Option<TransportError>>);

impl LastFailure {
    fn take(&self) -> Option<TransportError> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl RetryPolicy for LastFailure {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(classify(&ctx.error));
        ControlFlow::Break(())
    }
}

/// Error for a code the server rejected, given the last classified failure.
fn code_rejection(last: Option<TransportError>) -> TransportError {
    match last {
        Some(TransportError::CodeExpired) => TransportError::CodeExpired,
        _ => TransportError::InvalidCode,
    }
}

/// One in-flight login. Owns the client the code challenge is bound to.
pub struct MtprotoLogin {
    client: Client,
    user: UserId,
    path: PathBuf,
    failures: Arc<LastFailure>,
    token: Option<LoginToken>,
    /// Last accepted code; re-submitted to refresh the 2FA challenge.
    code: Option<String>,
    password: Option<PasswordToken>,
}

impl MtprotoLogin {
    async fn sign_in(&mut self, code: &str) -> TransportResult<CodeOutcome> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| TransportError::Other("no login code was requested".to_string()))?;

        self.failures.take();
        match self.client.sign_in(token, code).await {
            Ok(_) => Ok(CodeOutcome::Authorized),
            Err(SignInError::PasswordRequired(pw)) => {
                let hint = pw.hint().map(str::to_string);
                self.code = Some(code.to_string());
                self.password = Some(*pw);
                Ok(CodeOutcome::PasswordRequired { hint })
            }
            Err(SignInError::InvalidCode) => Err(code_rejection(self.failures.take())),
            Err(SignInError::SignUpRequired) => Err(TransportError::SignUpRequired),
            Err(SignInError::Other(e)) => Err(classify(&e)),
        }
    }
}

#[async_trait]
impl LoginConnection for MtprotoLogin {
    async fn request_code(&mut self, phone: &str) -> TransportResult<()> {
        let token = self
            .client
            .request_login_code(phone)
            .await
            .map_err(|e| classify(&e))?;
        self.token = Some(token);
        Ok(())
    }

    async fn submit_code(&mut self, code: &str) -> TransportResult<CodeOutcome> {
        self.sign_in(code).await
    }

    async fn submit_password(&mut self, password: &str) -> TransportResult<()> {
        let pw = match self.password.take() {
            Some(pw) => pw,
            None => {
                // The previous challenge was consumed by a failed attempt.
                let code = self.code.clone().ok_or(TransportError::InvalidPassword)?;
                match self.sign_in(&code).await? {
                    CodeOutcome::Authorized => return Ok(()),
                    CodeOutcome::PasswordRequired { .. } => self
                        .password
                        .take()
                        .ok_or(TransportError::InvalidPassword)?,
                }
            }
        };

        self.client
            .check_password(pw, password)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn export_session(&mut self) -> TransportResult<SessionBlob> {
        self.client
            .save_session()
            .await
            .map_err(|e| classify(&e))?;
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| TransportError::Other(format!("failed to read session file: {e}")))?;
        Ok(SessionBlob(bytes))
    }

    async fn close(&mut self) {
        self.token = None;
        self.code = None;
        self.password = None;
        tracing::debug!(user = self.user.0, "login connection closed");
    }

    fn into_transport(self: Box<Self>) -> Arc<dyn ChannelTransport> {
        Arc::new(MtprotoTransport::new(self.client, self.user))
    }
}

async fn remove_if_exists(path: &Path) -> TransportResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransportError::Other(format!(
            "failed to reset session file {}: {e}",
            path.display()
        ))),
    }
}
