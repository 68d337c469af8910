use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

use crate::{
    domain::{InboundEvent, SenderHint, SenderIdentity},
    messaging::port::MessagingPort,
};

// Above this many entries, stale ones are swept on insert.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Clone)]
struct CacheEntry {
    identity: SenderIdentity,
    at: Instant,
}

/// Resolves sender identities with a TTL cache in front of the messenger's
/// profile lookup.
pub struct IdentityResolver {
    messenger: Option<Arc<dyn MessagingPort>>,
    ttl: Duration,
    lookup_timeout: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl IdentityResolver {
    pub fn new(
        messenger: Option<Arc<dyn MessagingPort>>,
        ttl: Duration,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            messenger,
            ttl,
            lookup_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the sender of `event`. Never fails: lookup errors fall back to
    /// whatever the event itself carries.
    pub async fn resolve(&self, event: &InboundEvent) -> SenderIdentity {
        let Some(sender_id) = event.sender_id.as_deref() else {
            return compose(None, &event.sender_hint, &event.channel_display_name);
        };

        if let Some(hit) = self.get_cached(sender_id).await {
            return hit;
        }

        let mut hint = event.sender_hint.clone();
        if hint.is_empty() {
            if let Some(found) = self.lookup(sender_id).await {
                hint = found;
            }
        }

        let identity = compose(Some(sender_id), &hint, &event.channel_display_name);
        self.set_cached(sender_id.to_string(), identity.clone()).await;
        identity
    }

    async fn lookup(&self, sender_id: &str) -> Option<SenderHint> {
        let messenger = self.messenger.as_ref()?;
        if !messenger.capabilities().supports_sender_lookup {
            return None;
        }
        match tokio::time::timeout(self.lookup_timeout, messenger.lookup_sender(sender_id)).await {
            Ok(Ok(hint)) => hint,
            Ok(Err(e)) => {
                debug!(sender_id, error = %e, "sender lookup failed");
                None
            }
            Err(_) => {
                debug!(sender_id, timeout = ?self.lookup_timeout, "sender lookup timed out");
                None
            }
        }
    }

    async fn get_cached(&self, key: &str) -> Option<SenderIdentity> {
        let now = Instant::now();
        let map = self.cache.lock().await;
        map.get(key)
            .filter(|e| now.duration_since(e.at) <= self.ttl)
            .map(|e| e.identity.clone())
    }

    async fn set_cached(&self, key: String, identity: SenderIdentity) {
        let now = Instant::now();
        let mut map = self.cache.lock().await;
        if map.len() >= SWEEP_THRESHOLD {
            let ttl = self.ttl;
            map.retain(|_, e| now.duration_since(e.at) <= ttl);
        }
        map.insert(key, CacheEntry { identity, at: now });
    }
}

fn clean(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Build an identity from the fields at hand.
///
/// `display` prefers `Full Name (@username)`, then the name, the username,
/// the raw id and finally the channel display name.
pub fn compose(sender_id: Option<&str>, hint: &SenderHint, channel_name: &str) -> SenderIdentity {
    let first = clean(hint.first_name.as_deref());
    let last = clean(hint.last_name.as_deref());
    let full_name = match (first, last) {
        (Some(f), Some(l)) => Some(format!("{f} {l}")),
        (Some(f), None) => Some(f),
        (None, Some(l)) => Some(l),
        (None, None) => None,
    };
    let username = clean(hint.username.as_deref().map(|u| u.trim().trim_start_matches('@')));
    let id = clean(sender_id);

    let display = match (&full_name, &username) {
        (Some(n), Some(u)) => format!("{n} (@{u})"),
        (Some(n), None) => n.clone(),
        (None, Some(u)) => format!("@{u}"),
        (None, None) => id.clone().unwrap_or_else(|| channel_name.to_string()),
    };

    SenderIdentity {
        id,
        username,
        full_name,
        display,
    }
}
