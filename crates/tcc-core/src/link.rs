//! Message link parsing.
//!
//! Accepted forms, tried in order:
//! 1. `https://t.me/c/<internal id>/<msg>` (private channel)
//! 2. `https://t.me/<username>/<msg>` (public channel)
//! 3. `@<username>/<msg>`
//! 4. `<channel id>/<msg>` (id may be negative)
//! 5. `<msg>` (no channel; the caller supplies it)

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    domain::{ChannelId, ChannelRef, MessageId, MessageLink},
    errors::LinkParseError,
};

const USERNAME: &str = r"[a-zA-Z][a-zA-Z0-9_]{3,30}[a-zA-Z0-9]";
const URL_PREFIX: &str = r"(?:https?://)?(?:www\.)?(?:t|telegram)\.me/";
const URL_SUFFIX: &str = r"/?(?:\?.*)?";

struct Patterns {
    private: Regex,
    public: Regex,
    at: Regex,
    raw: Regex,
    bare: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        private: compile(&format!(r"^{URL_PREFIX}c/(\d+)/(\d+){URL_SUFFIX}$")),
        public: compile(&format!(r"^{URL_PREFIX}({USERNAME})/(\d+){URL_SUFFIX}$")),
        at: compile(&format!(r"^@({USERNAME})/(\d+)$")),
        raw: compile(r"^(-?\d+)/(\d+)$"),
        bare: compile(r"^(\d+)$"),
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

/// Parse a message reference into an optional channel and a message id.
pub fn parse_message_link(input: &str) -> Result<MessageLink, LinkParseError> {
    let link = input.trim();
    let err = || LinkParseError {
        input: input.to_string(),
    };
    let p = patterns();

    if let Some(c) = p.private.captures(link) {
        let bare: i64 = c[1].parse().map_err(|_| err())?;
        let channel = ChannelId::from_internal(bare).ok_or_else(err)?;
        return Ok(MessageLink {
            channel: Some(ChannelRef::Id(channel)),
            message_id: parse_msg_id(&c[2]).ok_or_else(err)?,
        });
    }

    for re in [&p.public, &p.at] {
        if let Some(c) = re.captures(link) {
            return Ok(MessageLink {
                channel: Some(ChannelRef::Username(c[1].to_string())),
                message_id: parse_msg_id(&c[2]).ok_or_else(err)?,
            });
        }
    }

    if let Some(c) = p.raw.captures(link) {
        let id: i64 = c[1].parse().map_err(|_| err())?;
        let channel = ChannelId::from_marked(id).ok_or_else(err)?;
        return Ok(MessageLink {
            channel: Some(ChannelRef::Id(channel)),
            message_id: parse_msg_id(&c[2]).ok_or_else(err)?,
        });
    }

    if let Some(c) = p.bare.captures(link) {
        return Ok(MessageLink {
            channel: None,
            message_id: parse_msg_id(&c[1]).ok_or_else(err)?,
        });
    }

    Err(err())
}

/// Parse a channel reference as typed in `/setdest` or `/clone`.
///
/// Accepts a numeric id, `@username`, a bare username, or a `t.me/<username>` link.
pub fn parse_channel_ref(input: &str) -> Result<ChannelRef, LinkParseError> {
    static USERNAME_RE: OnceLock<Regex> = OnceLock::new();
    let username_re = USERNAME_RE.get_or_init(|| {
        compile(&format!(r"^(?:@|{URL_PREFIX})?({USERNAME}){URL_SUFFIX}$"))
    });

    let raw = input.trim();
    if let Some(id) = raw.parse::<i64>().ok().and_then(ChannelId::from_marked) {
        return Ok(ChannelRef::Id(id));
    }
    if let Some(c) = username_re.captures(raw) {
        return Ok(ChannelRef::Username(c[1].to_string()));
    }
    Err(LinkParseError {
        input: input.to_string(),
    })
}

fn parse_msg_id(s: &str) -> Option<MessageId> {
    s.parse::<i32>().ok().map(MessageId)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(channel: Option<ChannelRef>, id: i32) -> MessageLink {
        MessageLink {
            channel,
            message_id: MessageId(id),
        }
    }

    #[test]
    fn parses_private_channel_link() {
        let got = parse_message_link("https://t.me/c/1234567890/42").unwrap();
        assert_eq!(
            got,
            link(Some(ChannelRef::Id(ChannelId(-1001234567890))), 42)
        );
        assert_eq!(parse_message_link("t.me/c/1234567890/42").unwrap(), got);
    }

    #[test]
    fn parses_public_channel_link() {
        let got = parse_message_link("https://t.me/some_channel/7").unwrap();
        assert_eq!(
            got,
            link(Some(ChannelRef::Username("some_channel".into())), 7)
        );
        assert_eq!(
            parse_message_link("  t.me/some_channel/7?single  ").unwrap(),
            got
        );
    }

    #[test]
    fn parses_at_shorthand() {
        assert_eq!(
            parse_message_link("@news_feed/100").unwrap(),
            link(Some(ChannelRef::Username("news_feed".into())), 100)
        );
    }

    #[test]
    fn parses_raw_id_pair() {
        assert_eq!(
            parse_message_link("-1001234567890/5").unwrap(),
            link(Some(ChannelRef::Id(ChannelId(-1001234567890))), 5)
        );
        assert_eq!(
            parse_message_link("777/5").unwrap(),
            link(Some(ChannelRef::Id(ChannelId(777))), 5)
        );
    }

    #[test]
    fn parses_bare_sequence_number() {
        assert_eq!(parse_message_link("314").unwrap(), link(None, 314));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in [
            "",
            "hello",
            "t.me/abc/1",
            "t.me/channel_/1",
            "t.me/1channel/1",
            "@ab/5",
            "t.me/some_channel/abc",
            "12/34abc",
            "-5",
            "https://t.me/c/abc/1",
            "https://t.me/c/9223372036854775000/1",
            "-9223372036854775808/5",
            "99999999999999999999/5",
        ] {
            assert!(parse_message_link(bad).is_err(), "expected failure for {bad:?}");
        }
    }

    #[test]
    fn numeric_and_username_forms_are_not_equated() {
        let a = parse_message_link("t.me/c/1234567890/1").unwrap();
        let b = parse_message_link("@some_channel/1").unwrap();
        assert_ne!(a.channel, b.channel);
    }

    #[test]
    fn parses_channel_refs() {
        assert_eq!(
            parse_channel_ref("-1001234567890").unwrap(),
            ChannelRef::Id(ChannelId(-1001234567890))
        );
        assert_eq!(
            parse_channel_ref("@some_channel").unwrap(),
            ChannelRef::Username("some_channel".into())
        );
        assert_eq!(
            parse_channel_ref("https://t.me/some_channel").unwrap(),
            ChannelRef::Username("some_channel".into())
        );
        assert!(parse_channel_ref("not a channel").is_err());
        assert!(parse_channel_ref("-9223372036854775808").is_err());
    }
}
