//! Allow-list enforcement for ingress.
//!
//! An empty `allow_users` list permits everyone; a non-empty list admits
//! only the named users. Entries may be numeric Telegram user ids or
//! usernames with or without the leading `@`.

/// Returns `true` when the given Telegram user may interact with the bot.
pub fn is_allowed(allow_users: &[String], username: &str, user_id: &str) -> bool {
    if allow_users.is_empty() {
        return true;
    }
    allow_users.iter().any(|entry| {
        let entry = entry.trim_start_matches('@');
        entry == username || entry == user_id
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_permits_everyone() {
        assert!(is_allowed(&[], "alice", "111"));
        assert!(is_allowed(&[], "", "999"));
    }

    #[test]
    fn match_by_numeric_user_id() {
        let list = vec!["123456789".to_string()];
        assert!(is_allowed(&list, "", "123456789"));
        assert!(!is_allowed(&list, "alice", "111"));
    }

    #[test]
    fn match_by_username_with_or_without_at() {
        let list = vec!["@alice".to_string(), "bob".to_string()];
        assert!(is_allowed(&list, "alice", "1"));
        assert!(is_allowed(&list, "bob", "2"));
        assert!(!is_allowed(&list, "carol", "3"));
    }

    #[test]
    fn non_empty_list_denies_unknown_users() {
        let list = vec!["alice".to_string()];
        assert!(!is_allowed(&list, "", ""));
    }
}
