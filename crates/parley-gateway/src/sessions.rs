use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Two users who completed the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub participant_a: String,
    pub participant_b: String,
    pub established_at: DateTime<Utc>,
}

impl Session {
    /// The other participant, if `username` is one of the two.
    pub fn peer_of(&self, username: &str) -> Option<&str> {
        if self.participant_a == username {
            Some(&self.participant_b)
        } else if self.participant_b == username {
            Some(&self.participant_a)
        } else {
            None
        }
    }

    fn pairs(&self, a: &str, b: &str) -> bool {
        self.peer_of(a) == Some(b)
    }
}

/// Established sessions, indexed by participant. A user is in at most one
/// session at a time.
#[derive(Clone, Default)]
pub struct SessionTable {
    partners: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `a` with `b`. Any other session either of them was in is torn
    /// down and returned so the displaced partners can be told.
    pub async fn establish(&self, a: &str, b: &str) -> Vec<Session> {
        let mut partners = self.partners.write().await;
        let mut displaced = Vec::new();

        for user in [a, b] {
            let Some(old) = partners.remove(user) else {
                continue;
            };
            if old.pairs(a, b) {
                continue;
            }
            if let Some(peer) = old.peer_of(user) {
                partners.remove(peer);
            }
            displaced.push(old);
        }

        let session = Session {
            participant_a: a.to_string(),
            participant_b: b.to_string(),
            established_at: Utc::now(),
        };
        partners.insert(a.to_string(), session.clone());
        partners.insert(b.to_string(), session);

        displaced
    }

    /// Tear down the session between `a` and `b`, if they have one.
    pub async fn end(&self, a: &str, b: &str) -> Option<Session> {
        let mut partners = self.partners.write().await;
        if !partners.get(a).is_some_and(|s| s.pairs(a, b)) {
            return None;
        }
        partners.remove(b);
        partners.remove(a)
    }

    pub async fn is_paired(&self, a: &str, b: &str) -> bool {
        self.partners
            .read()
            .await
            .get(a)
            .is_some_and(|s| s.pairs(a, b))
    }
}
