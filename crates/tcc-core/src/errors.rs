use std::time::Duration;

/// Core error type for the cloner.
///
/// Adapter crates map their specific errors into this type (or into the
/// narrower enums below) so the bot front-end can render failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Link(#[from] LinkParseError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error("a clone task is already running for this user")]
    TaskActive,

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure vocabulary shared by the login flow and the cloning engine.
///
/// Transport adapters classify platform errors into these variants; everything
/// they cannot classify ends up in `Other`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("rate limited, retry in {}s", .0.as_secs())]
    RateLimited(Duration),

    #[error("forwarding is restricted in the source channel")]
    ForwardingRestricted,

    #[error("channel is private or unavailable: {0}")]
    ChannelPrivate(String),

    #[error("account is not a participant of the channel")]
    NotParticipant,

    #[error("two-factor password required")]
    PasswordRequired { hint: Option<String> },

    #[error("invalid login code")]
    InvalidCode,

    #[error("login code expired")]
    CodeExpired,

    #[error("invalid two-factor password")]
    InvalidPassword,

    #[error("phone number is not registered")]
    SignUpRequired,

    #[error("session is not authorized")]
    Unauthorized,

    #[error("{0}")]
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized message link: {input}")]
pub struct LinkParseError {
    pub input: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("no pending login")]
    NoPendingLogin,

    #[error("already logged in")]
    AlreadyLoggedIn,

    #[error("a login is already in progress")]
    LoginInProgress,

    #[error("login is not waiting for {expected}")]
    WrongPhase { expected: &'static str },

    #[error("invalid phone number")]
    InvalidPhone,

    #[error("too many attempts, retry in {}s", .0.as_secs())]
    RateLimited(Duration),

    #[error("invalid code")]
    InvalidCode,

    #[error("code expired")]
    CodeExpired,

    #[error("invalid password")]
    InvalidPassword,

    #[error("phone number is not registered")]
    SignUpRequired,

    #[error("login attempt expired")]
    Expired,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to persist session: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt store record: {0}")]
    Corrupt(String),
}

/// Failures detected before a clone job starts.
///
/// Once replication begins, the caller only ever sees a `CloneReport`.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("no destination channel set")]
    NoDestination,

    #[error("cannot read source channel: {0}")]
    ChannelAccess(String),

    #[error("cannot post to destination channel: {0}")]
    PostPermission(String),

    #[error("start and end links point to different channels")]
    ChannelMismatch,

    #[error("could not resolve channel: {0}")]
    Resolve(String),
}

impl From<TransportError> for LoginError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::RateLimited(d) => LoginError::RateLimited(d),
            TransportError::InvalidCode => LoginError::InvalidCode,
            TransportError::CodeExpired => LoginError::CodeExpired,
            TransportError::InvalidPassword => LoginError::InvalidPassword,
            TransportError::SignUpRequired => LoginError::SignUpRequired,
            other => LoginError::Transport(other.to_string()),
        }
    }
}
