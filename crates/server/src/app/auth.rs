use std::fmt;

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct UserId(String);

impl UserId {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps a client token to the user it identifies for one room. Real
/// deployments plug a signed-token check in here.
pub(crate) trait TokenVerifier: Send + Sync {
    fn verify_token(&self, token: &str, room_id: &str) -> Option<UserId>;
}

/// Accepts `<prefix><user>` or `<prefix><user>@<room>`. A token scoped to a
/// room is only valid for that room.
#[derive(Debug, Clone)]
pub(crate) struct PrefixTokenVerifier {
    prefix: String,
}

impl PrefixTokenVerifier {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TokenVerifier for PrefixTokenVerifier {
    fn verify_token(&self, token: &str, room_id: &str) -> Option<UserId> {
        let Some(rest) = token.strip_prefix(self.prefix.as_str()) else {
            debug!(room = room_id, "token_rejected_prefix");
            return None;
        };
        let user = match rest.split_once('@') {
            Some((user, scoped_room)) => {
                if scoped_room != room_id {
                    debug!(room = room_id, scoped_room, "token_rejected_room_scope");
                    return None;
                }
                user
            }
            None => rest,
        };
        if !is_valid_user_name(user) {
            debug!(room = room_id, "token_rejected_user");
            return None;
        }
        Some(UserId::new(user))
    }
}

fn is_valid_user_name(user: &str) -> bool {
    !user.is_empty()
        && user
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
