use dashmap::DashMap;

use crate::limits::STATE_TOKEN_TTL_MS;
use crate::model::Ms;
use crate::store::generate_token;

/// Single-use CSRF tokens for the OAuth redirect, keyed by token with their
/// issue time.
#[derive(Default)]
pub struct StateTokens {
    issued: DashMap<String, Ms>,
}

impl StateTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, now: Ms) -> String {
        let token = generate_token();
        self.issued.insert(token.clone(), now);
        token
    }

    /// Remove the token; true only if it existed and is still fresh.
    pub fn consume(&self, token: &str, now: Ms) -> bool {
        match self.issued.remove(token) {
            Some((_, issued_at)) => now - issued_at <= STATE_TOKEN_TTL_MS,
            None => false,
        }
    }

    /// Drop tokens older than the TTL. Returns how many were removed.
    pub fn sweep(&self, now: Ms) -> usize {
        let before = self.issued.len();
        self.issued.retain(|_, issued_at| now - *issued_at <= STATE_TOKEN_TTL_MS);
        before.saturating_sub(self.issued.len())
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_consumed_once() {
        let tokens = StateTokens::new();
        let t = tokens.issue(1_000);
        assert!(tokens.consume(&t, 2_000));
        assert!(!tokens.consume(&t, 2_000));
    }

    #[test]
    fn stale_token_is_rejected() {
        let tokens = StateTokens::new();
        let t = tokens.issue(0);
        assert!(!tokens.consume(&t, STATE_TOKEN_TTL_MS + 1));
        assert!(tokens.is_empty());
    }

    #[test]
    fn sweep_keeps_fresh_tokens() {
        let tokens = StateTokens::new();
        tokens.issue(0);
        let fresh = tokens.issue(STATE_TOKEN_TTL_MS);
        assert_eq!(tokens.sweep(STATE_TOKEN_TTL_MS + 10), 1);
        assert_eq!(tokens.len(), 1);
        assert!(tokens.consume(&fresh, STATE_TOKEN_TTL_MS + 10));
    }
}
