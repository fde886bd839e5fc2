use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id as seen by the Bot API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i32);

/// A stable reference to a bot-side Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

const CHANNEL_MARKER: i64 = 1_000_000_000_000;

/// Channel id in "marked" form (`-100XXXXXXXXXX`), the shape users paste.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl ChannelId {
    /// Build a marked id from the bare id used in `t.me/c/<id>/...` links.
    ///
    /// `None` when the marked form does not fit in an `i64`.
    pub fn from_internal(bare: i64) -> Option<Self> {
        CHANNEL_MARKER
            .checked_add(bare)?
            .checked_neg()
            .map(Self)
    }

    /// Accept an id as typed by a user. `i64::MIN` has no bare form.
    pub fn from_marked(raw: i64) -> Option<Self> {
        raw.checked_neg().map(|_| Self(raw))
    }

    /// Bare channel id as used by MTProto (`-1001234` becomes `1234`).
    ///
    /// Ids that are not in marked form are returned unchanged.
    pub fn internal(self) -> i64 {
        if self.0 <= -CHANNEL_MARKER {
            // self.0 + CHANNEL_MARKER is in [i64::MIN + MARKER, 0], so the negation fits.
            -(self.0 + CHANNEL_MARKER)
        } else {
            self.0
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Either a numeric channel id or a public username, not yet resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelRef {
    Id(ChannelId),
    Username(String),
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Id(id) => write!(f, "{id}"),
            ChannelRef::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// Output of the link parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageLink {
    pub channel: Option<ChannelRef>,
    pub message_id: MessageId,
}

/// Inclusive message id range; `start <= end` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRange {
    start: MessageId,
    end: MessageId,
}

impl MessageRange {
    pub fn new(a: MessageId, b: MessageId) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn start(&self) -> MessageId {
        self.start
    }

    pub fn end(&self) -> MessageId {
        self.end
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.start <= id && id <= self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloneMode {
    /// Whole history, optionally only ids strictly greater than `resume_after`.
    Full { resume_after: Option<MessageId> },
    Range(MessageRange),
}

impl CloneMode {
    pub fn is_full(&self) -> bool {
        matches!(self, CloneMode::Full { .. })
    }
}

#[derive(Clone, Debug)]
pub struct CloneJob {
    pub user_id: UserId,
    pub source: ChannelId,
    pub destination: ChannelId,
    pub mode: CloneMode,
    pub created_at: DateTime<Utc>,
}

impl CloneJob {
    pub fn new(user_id: UserId, source: ChannelId, destination: ChannelId, mode: CloneMode) -> Self {
        Self {
            user_id,
            source,
            destination,
            mode,
            created_at: Utc::now(),
        }
    }
}

/// Kind of a history entry, as far as replication cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Content,
    Service,
    Empty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryItem {
    pub id: MessageId,
    pub kind: ItemKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub title: String,
    pub username: Option<String>,
    pub protected_content: bool,
}

/// The logged-in account's standing in a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Owner,
    Admin { can_post: bool },
    Member,
    NotMember,
}

/// Identity of the account behind a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
}

impl AccountInfo {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {last}", self.first_name),
            _ => self.first_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_order_insensitive() {
        let a = MessageRange::new(MessageId(50), MessageId(10));
        let b = MessageRange::new(MessageId(10), MessageId(50));
        assert_eq!(a, b);
        assert_eq!(a.start(), MessageId(10));
        assert_eq!(a.end(), MessageId(50));
        assert!(a.contains(MessageId(10)));
        assert!(a.contains(MessageId(50)));
        assert!(!a.contains(MessageId(51)));
    }

    #[test]
    fn channel_marker_conversion() {
        let id = ChannelId::from_internal(1234567890).unwrap();
        assert_eq!(id.0, -1001234567890);
        assert_eq!(id.internal(), 1234567890);
        assert_eq!(ChannelId(777).internal(), 777);
    }

    #[test]
    fn channel_conversion_never_overflows() {
        assert_eq!(ChannelId::from_internal(9_223_372_036_854_775_000), None);
        assert_eq!(ChannelId::from_internal(i64::MAX), None);
        let largest = ChannelId::from_internal(i64::MAX - CHANNEL_MARKER).unwrap();
        assert_eq!(largest.0, -i64::MAX);
        assert_eq!(largest.internal(), i64::MAX - CHANNEL_MARKER);

        assert_eq!(ChannelId::from_marked(i64::MIN), None);
        assert_eq!(ChannelId::from_marked(-1001234567890), Some(ChannelId(-1001234567890)));
        assert_eq!(ChannelId(i64::MIN).internal(), i64::MAX - CHANNEL_MARKER + 1);
    }
}
