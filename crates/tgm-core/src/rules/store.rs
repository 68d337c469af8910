use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    rules::{
        normalize::RawRules,
        snapshot::{RuleSnapshot, SourceVersion},
    },
    Result,
};

/// Where raw rule JSON comes from.
pub trait RuleSource: Send + Sync {
    fn describe(&self) -> String;

    /// Last-modified token, or `None` when the source does not exist.
    fn version(&self) -> Result<Option<SourceVersion>>;

    fn read(&self) -> Result<String>;
}

/// Rule JSON on the local filesystem, versioned by mtime.
#[derive(Clone, Debug)]
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleSource for FileRuleSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn version(&self) -> Result<Option<SourceVersion>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let modified = fs::metadata(&self.path)?.modified()?;
        Ok(Some(SourceVersion::from_modified(modified)))
    }

    fn read(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }
}

/// Holds the current rule snapshot and republishes it on change.
///
/// Readers load an `Arc<RuleSnapshot>` from an atomic pointer and never lock;
/// reloads build a complete snapshot before swapping it in.
pub struct RuleStore {
    source: Box<dyn RuleSource>,
    fallback_owner: Option<String>,
    current: ArcSwap<RuleSnapshot>,
    tx: watch::Sender<Arc<RuleSnapshot>>,
    // Version of the last publish; serializes writers.
    published: Mutex<Option<SourceVersion>>,
}

impl RuleStore {
    /// Create a store holding the fallback snapshot; nothing is read yet.
    pub fn new(source: Box<dyn RuleSource>, fallback_owner: Option<String>) -> Self {
        let initial = Arc::new(RuleSnapshot::fallback(fallback_owner.as_deref()));
        let (tx, _rx) = watch::channel(initial.clone());
        Self {
            source,
            fallback_owner,
            current: ArcSwap::new(initial),
            tx,
            published: Mutex::new(None),
        }
    }

    /// Create a store and perform the initial load.
    pub fn open(source: Box<dyn RuleSource>, fallback_owner: Option<String>) -> Self {
        let store = Self::new(source, fallback_owner);
        store.reload_if_changed();
        store
    }

    pub fn current(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Change notifications for long-lived readers.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RuleSnapshot>> {
        self.tx.subscribe()
    }

    /// Reload only when the source's last-modified token moved.
    ///
    /// Returns whether a new snapshot was published.
    pub fn reload_if_changed(&self) -> bool {
        let mut published = self.lock_published();

        let version = match self.source.version() {
            Ok(Some(v)) => v,
            Ok(None) => {
                if *published == Some(SourceVersion::MISSING) {
                    return false;
                }
                warn!(source = %self.source.describe(), "rule source not found, using defaults");
                self.publish_fallback(&mut published);
                return true;
            }
            Err(e) => {
                if *published == Some(SourceVersion::MISSING) {
                    return false;
                }
                warn!(source = %self.source.describe(), error = %e, "rule source unreadable, using defaults");
                self.publish_fallback(&mut published);
                return true;
            }
        };

        if *published == Some(version) {
            debug!(source = %self.source.describe(), "rules unchanged");
            return false;
        }

        if let Err(e) = self.load_and_publish(version, &mut published) {
            error!(source = %self.source.describe(), error = %e, "failed to load rules, using defaults");
        }
        true
    }

    /// Re-read and recompile unconditionally (push-notification path).
    ///
    /// On a malformed source the fallback snapshot is still published and the
    /// error is returned to the caller.
    pub fn force_reload(&self) -> Result<()> {
        let mut published = self.lock_published();

        let Some(version) = self.source.version()? else {
            warn!(source = %self.source.describe(), "rule source not found, using defaults");
            self.publish_fallback(&mut published);
            return Ok(());
        };

        self.load_and_publish(version, &mut published)
    }

    fn load_and_publish(
        &self,
        version: SourceVersion,
        published: &mut MutexGuard<'_, Option<SourceVersion>>,
    ) -> Result<()> {
        let raw = match self.source.read().and_then(|s| RawRules::parse(&s)) {
            Ok(raw) => raw,
            Err(e) => {
                self.publish(RuleSnapshot::fallback(self.fallback_owner.as_deref()));
                // Remember the broken version so the poll loop does not re-parse it.
                **published = Some(version);
                return Err(e);
            }
        };

        let snapshot = RuleSnapshot::build(raw, version, self.fallback_owner.as_deref());
        for skipped in &snapshot.skipped_patterns {
            warn!(pattern = %skipped.pattern, reason = %skipped.reason, "invalid alert regex skipped");
        }
        info!(
            keywords = snapshot.monitor_keywords.len(),
            alert_keywords = snapshot.alert_keywords.len(),
            regex = snapshot.alert_patterns.len(),
            channels = snapshot.channel_allowlist.len(),
            alert_target = %snapshot.alert_target,
            "rules loaded"
        );

        self.publish(snapshot);
        **published = Some(version);
        Ok(())
    }

    fn publish_fallback(&self, published: &mut MutexGuard<'_, Option<SourceVersion>>) {
        self.publish(RuleSnapshot::fallback(self.fallback_owner.as_deref()));
        **published = Some(SourceVersion::MISSING);
    }

    fn publish(&self, snapshot: RuleSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());
        self.tx.send_replace(snapshot);
    }

    fn lock_published(&self) -> MutexGuard<'_, Option<SourceVersion>> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Poll the rule source every `interval` until cancelled.
///
/// The push endpoint is the primary reload path; this loop is the fallback.
pub fn spawn_reloader(
    store: Arc<RuleStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut tick = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                let store = store.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || store.reload_if_changed()).await {
                  error!(error = %e, "rule reload task panicked");
                }
              }
            }
        }
        debug!("rule reloader stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    /// In-memory source with an explicit version knob.
    #[derive(Clone, Default)]
    struct MemorySource {
        inner: Arc<Mutex<(Option<u128>, String)>>,
    }

    impl MemorySource {
        fn set(&self, version: u128, body: &str) {
            *self.inner.lock().unwrap() = (Some(version), body.to_string());
        }
    }

    impl RuleSource for MemorySource {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        fn version(&self) -> Result<Option<SourceVersion>> {
            Ok(self.inner.lock().unwrap().0.map(SourceVersion))
        }

        fn read(&self) -> Result<String> {
            Ok(self.inner.lock().unwrap().1.clone())
        }
    }

    #[test]
    fn reload_is_idempotent_without_source_change() {
        let src = MemorySource::default();
        src.set(10, r#"{"keywords": ["btc"]}"#);
        let store = RuleStore::new(Box::new(src.clone()), None);
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        assert!(store.reload_if_changed());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!store.reload_if_changed());
        assert!(!store.reload_if_changed());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.current().monitor_keywords[0].text, "btc");

        src.set(11, r#"{"keywords": ["eth"]}"#);
        assert!(store.reload_if_changed());
        assert_eq!(store.current().monitor_keywords[0].text, "eth");
        assert_eq!(store.current().source_version, SourceVersion(11));
    }

    #[test]
    fn missing_file_publishes_defaults_once() {
        let path = tmp_file("tgm-rules-missing");
        let store = RuleStore::new(Box::new(FileRuleSource::new(&path)), None);

        assert!(store.reload_if_changed());
        assert!(!store.reload_if_changed());
        let snap = store.current();
        assert!(snap.log_all_messages);
        assert_eq!(snap.source_version, SourceVersion::MISSING);
    }

    #[test]
    fn file_source_loads_and_keeps_good_patterns() {
        let path = tmp_file("tgm-rules");
        fs::write(
            &path,
            r#"{"keywords": "invoice", "alert_regex": ["(", "ok.*"], "channels": [-1001]}"#,
        )
        .unwrap();

        let store = RuleStore::open(Box::new(FileRuleSource::new(&path)), Some("env-user".to_string()));
        let snap = store.current();
        assert_eq!(snap.monitor_keywords.len(), 1);
        assert_eq!(snap.alert_patterns.len(), 1);
        assert_eq!(snap.skipped_patterns.len(), 1);
        assert!(snap.allows_channel("-1001"));
        assert!(!snap.log_all_messages);
        assert_eq!(snap.owner_user_id.as_deref(), Some("env-user"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn force_reload_reports_malformed_source_and_falls_back() {
        let src = MemorySource::default();
        src.set(1, r#"{"keywords": ["btc"]}"#);
        let store = RuleStore::open(Box::new(src.clone()), None);
        assert!(!store.current().log_all_messages);

        src.set(2, "{not json");
        let err = store.force_reload().unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert!(store.current().log_all_messages);
        assert!(store.current().monitor_keywords.is_empty());

        // Same broken version is not re-parsed by the poll loop.
        assert!(!store.reload_if_changed());
    }

    #[test]
    fn force_reload_always_recompiles() {
        let src = MemorySource::default();
        src.set(1, r#"{"keywords": ["btc"]}"#);
        let store = RuleStore::open(Box::new(src.clone()), None);
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.force_reload().unwrap();
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn current_does_not_wait_for_a_reload_in_progress() {
        let src = MemorySource::default();
        src.set(1, r#"{"keywords": ["btc"]}"#);
        let store = RuleStore::open(Box::new(src.clone()), None);

        let writer = store.lock_published();
        let snap = store.current();
        assert_eq!(snap.monitor_keywords[0].text, "btc");
        drop(writer);

        src.set(2, r#"{"keywords": ["eth"]}"#);
        assert!(store.reload_if_changed());
        // Earlier readers keep their snapshot; new readers see the swap.
        assert_eq!(snap.monitor_keywords[0].text, "btc");
        assert_eq!(store.current().monitor_keywords[0].text, "eth");
    }

    #[tokio::test(start_paused = true)]
    async fn reloader_picks_up_changes_and_stops_on_cancel() {
        let src = MemorySource::default();
        src.set(1, r#"{"keywords": ["a"]}"#);
        let store = Arc::new(RuleStore::open(Box::new(src.clone()), None));
        let cancel = CancellationToken::new();
        let handle = spawn_reloader(store.clone(), Duration::from_secs(300), cancel.clone());

        src.set(2, r#"{"keywords": ["b"]}"#);
        let mut rx = store.subscribe();
        rx.borrow_and_update();
        tokio::time::sleep(Duration::from_secs(301)).await;
        rx.changed().await.unwrap();
        assert_eq!(store.current().monitor_keywords[0].text, "b");

        cancel.cancel();
        handle.await.unwrap();
    }
}
