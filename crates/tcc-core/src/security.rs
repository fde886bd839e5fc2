use crate::domain::UserId;

/// Allow-list check for bot commands.
///
/// An empty allow-list leaves the bot open to everyone; each user still needs
/// their own account login before anything can be cloned.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    allowed_users.is_empty() || allowed_users.contains(&user_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_updates_are_rejected() {
        assert!(!is_authorized(None, &[]));
        assert!(!is_authorized(None, &[1]));
    }

    #[test]
    fn allow_list_is_enforced_when_present() {
        assert!(is_authorized(Some(UserId(1)), &[1, 2]));
        assert!(!is_authorized(Some(UserId(3)), &[1, 2]));
    }

    #[test]
    fn empty_allow_list_is_open() {
        assert!(is_authorized(Some(UserId(42)), &[]));
    }
}
