/// `input/reconcile.rs` — keep the transport layer in sync with module overrides
///
/// Modules may pin themselves to one input transport (`inputSource`). The
/// set of transports in use is handed to the input layer, but only when it
/// actually changes. An empty set at startup is not reported.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::types::Track;

/// Transports a module may pin itself to.
pub const INPUT_SOURCES: &[&str] = &["midi", "osc", "audio", "file"];

#[async_trait]
pub trait SourceReconciler: Send + Sync {
    async fn reconcile_sources(&self, names: Vec<String>);
}

/// Distinct, allowed `inputSource` values of enabled modules, sorted.
pub fn collect_input_sources(tracks: &[Track]) -> Vec<String> {
    let mut names: Vec<String> = tracks
        .iter()
        .flat_map(|t| t.modules.iter())
        .filter(|m| !m.disabled)
        .filter_map(|m| m.input_source.as_deref())
        .map(str::trim)
        .filter(|s| INPUT_SOURCES.contains(s))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

pub struct InputReconciler {
    target: Arc<dyn SourceReconciler>,
    last_key: Mutex<Option<String>>,
    generation: AtomicU64,
    debounce: Duration,
}

impl InputReconciler {
    pub fn new(target: Arc<dyn SourceReconciler>, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            target,
            last_key: Mutex::new(None),
            generation: AtomicU64::new(0),
            debounce,
        })
    }

    /// Returns whether the input layer was called.
    pub async fn reconcile(&self, tracks: &[Track]) -> bool {
        let names = collect_input_sources(tracks);
        let key = names.join(",");
        {
            let mut last = self.last_key.lock().unwrap();
            let unchanged = match last.as_deref() {
                Some(prev) => prev == key,
                None => names.is_empty(),
            };
            *last = Some(key);
            if unchanged {
                return false;
            }
        }
        log::info!("[input] reconciling sources: {names:?}");
        self.target.reconcile_sources(names).await;
        true
    }

    /// Debounced `reconcile`; a later schedule supersedes pending ones.
    pub fn schedule(self: &Arc<Self>, tracks: Vec<Track>) -> tokio::task::JoinHandle<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            if this.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            this.reconcile(&tracks).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::testing::{module, track};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl SourceReconciler for Recorder {
        async fn reconcile_sources(&self, names: Vec<String>) {
            self.calls.lock().unwrap().push(names);
        }
    }

    fn with_source(source: Option<&str>, disabled: bool) -> Vec<Track> {
        let mut m = module("g1", "Grid");
        m.input_source = source.map(str::to_string);
        m.disabled = disabled;
        vec![track("A", &[m])]
    }

    fn setup(debounce_ms: u64) -> (Arc<Recorder>, Arc<InputReconciler>) {
        let recorder = Arc::new(Recorder::default());
        let reconciler = InputReconciler::new(
            recorder.clone() as Arc<dyn SourceReconciler>,
            Duration::from_millis(debounce_ms),
        );
        (recorder, reconciler)
    }

    #[test]
    fn collects_sorted_allowed_sources() {
        let mut a = module("a", "Grid");
        a.input_source = Some("osc".to_string());
        let mut b = module("b", "Grid");
        b.input_source = Some("midi".to_string());
        let mut c = module("c", "Grid");
        c.input_source = Some("bluetooth".to_string());
        let mut d = module("d", "Grid");
        d.input_source = Some("audio".to_string());
        d.disabled = true;
        let tracks = vec![track("A", &[a, b.clone()]), track("B", &[b, c, d])];
        assert_eq!(collect_input_sources(&tracks), vec!["midi".to_string(), "osc".to_string()]);
    }

    #[tokio::test]
    async fn reports_only_meaningful_changes() {
        let (recorder, reconciler) = setup(0);

        // startup with nothing pinned: no call
        assert!(!reconciler.reconcile(&with_source(None, false)).await);
        assert!(reconciler.reconcile(&with_source(Some("midi"), false)).await);
        assert!(!reconciler.reconcile(&with_source(Some("midi"), false)).await);
        assert!(reconciler.reconcile(&with_source(None, false)).await);
        assert!(!reconciler.reconcile(&with_source(Some("midi"), true)).await);

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![vec!["midi".to_string()], Vec::<String>::new()]
        );
    }

    #[tokio::test]
    async fn schedule_keeps_only_latest() {
        let (recorder, reconciler) = setup(20);
        let first = reconciler.schedule(with_source(Some("osc"), false));
        let second = reconciler.schedule(with_source(Some("midi"), false));
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*recorder.calls.lock().unwrap(), vec![vec!["midi".to_string()]]);
    }
}
