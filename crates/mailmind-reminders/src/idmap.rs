use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Isolated id-translation context for one check-in run. Real identifiers
/// (fingerprints, reminder hashes) never reach the LLM; it sees short
/// tokens, and tool calls translate back through this map. A snapshot is
/// persisted with any pending proactive message so the chat surface can
/// resolve the same tokens later.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IdMap {
    forward: HashMap<String, String>,
    #[serde(skip)]
    reverse: HashMap<String, String>,
    next: u32,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a real identifier, allocating `ref-<n>` on first sight.
    pub fn token_for(&mut self, real: &str) -> String {
        if let Some(token) = self.reverse.get(real) {
            return token.clone();
        }
        self.next += 1;
        let token = format!("ref-{}", self.next);
        self.forward.insert(token.clone(), real.to_string());
        self.reverse.insert(real.to_string(), token.clone());
        token
    }

    /// Real identifier behind a token.
    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.forward.get(token).map(String::as_str)
    }

    /// Serializable token → real-id view for persistence.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.forward.clone()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_stable_per_id() {
        let mut map = IdMap::new();
        let a1 = map.token_for("fp-alpha");
        let b = map.token_for("fp-beta");
        let a2 = map.token_for("fp-alpha");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(map.resolve(&a1), Some("fp-alpha"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let map = IdMap::new();
        assert_eq!(map.resolve("ref-99"), None);
    }
}
