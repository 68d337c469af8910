use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{MessageRef, SenderHint},
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, Recipient},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same destination.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return how long to wait before using it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Per-chat limiters kept before idle ones are pruned.
const PRUNE_CHATS_ABOVE: usize = 1024;

type ChatLimiters = HashMap<String, Arc<Mutex<IntervalLimiter>>>;

/// Drop limiters nobody holds whose next slot is already free.
fn prune_idle(map: &mut ChatLimiters, now: Instant) {
    map.retain(|_, lim| {
        Arc::strong_count(lim) > 1 || lim.try_lock().map_or(true, |l| l.next > now)
    });
}

/// MessagingPort decorator that spaces out outbound calls.
///
/// Best-effort defense against transport 429s when several AI summaries or
/// operator sends land at once.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<ChatLimiters>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, key: String) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        if map.len() >= PRUNE_CHATS_ABOVE && !map.contains_key(&key) {
            prune_idle(&mut map, Instant::now());
        }
        map.entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, to: &Recipient) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for(to.key()).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_text(&self, to: &Recipient, text: &str) -> Result<MessageRef> {
        self.throttle_chat(to).await;
        self.inner.send_text(to, text).await
    }

    async fn lookup_sender(&self, sender_id: &str) -> Result<Option<SenderHint>> {
        self.throttle_global().await;
        self.inner.lookup_sender(sender_id).await
    }
}
