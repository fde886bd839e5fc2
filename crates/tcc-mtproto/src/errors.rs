use std::time::Duration;

use layer_client::InvocationError;
use tcc_core::errors::TransportError;

/// Map a raw MTProto failure onto the shared transport vocabulary.
pub fn classify(e: &InvocationError) -> TransportError {
    if let Some(secs) = flood_wait(e) {
        return TransportError::RateLimited(Duration::from_secs(secs));
    }

    if e.is("CHAT_FORWARDS_RESTRICTED") {
        return TransportError::ForwardingRestricted;
    }
    if e.is("USER_NOT_PARTICIPANT") {
        return TransportError::NotParticipant;
    }
    if e.is("CHANNEL_PRIVATE") || e.is("CHANNEL_INVALID") || e.is("CHANNEL_PUBLIC_GROUP_NA") {
        return TransportError::ChannelPrivate(e.to_string());
    }
    if e.is("PHONE_CODE_EXPIRED") {
        return TransportError::CodeExpired;
    }
    if e.is("PHONE_CODE_*") {
        return TransportError::InvalidCode;
    }
    if e.is("PASSWORD_HASH_INVALID") {
        return TransportError::InvalidPassword;
    }
    if e.is("AUTH_KEY_UNREGISTERED")
        || e.is("SESSION_REVOKED")
        || e.is("SESSION_EXPIRED")
        || e.is("USER_DEACTIVATED*")
    {
        return TransportError::Unauthorized;
    }

    TransportError::Other(e.to_string())
}

/// `FLOOD_WAIT_N`, `FLOOD_PREMIUM_WAIT_N` and `SLOWMODE_WAIT_N` all carry a wait in seconds.
fn flood_wait(e: &InvocationError) -> Option<u64> {
    if let Some(secs) = e.flood_wait_seconds() {
        return Some(secs);
    }
    match e {
        InvocationError::Rpc(r) if r.is("FLOOD_*") || r.is("SLOWMODE_WAIT") => {
            r.value.map(u64::from)
        }
        _ => None,
    }
}
