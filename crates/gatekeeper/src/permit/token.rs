//! Admission tokens.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Identifier of a granted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TokenId(Uuid);

impl TokenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of granted admission.
///
/// Only the manager's arbiter creates tokens. The holder owns it until it is
/// handed back through a release; the arbiter keeps its own copy for tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    id: TokenId,
    created_at: DateTime<Utc>,
}

impl Token {
    pub(crate) fn grant() -> Self {
        Self {
            id: TokenId::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    /// When the token was granted. Informational only.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_tokens_have_unique_ids() {
        let a = Token::grant();
        let b = Token::grant();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn grant_time_is_recent() {
        let before = Utc::now();
        let token = Token::grant();
        assert!(token.created_at() >= before);
        assert!(token.created_at() <= Utc::now());
    }

    #[test]
    fn token_id_displays_as_uuid() {
        let id = TokenId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert!(Uuid::parse_str(&text).is_ok());
    }
}
