//! The application context (spec.md §9 "Global mutable state"): rather
//! than scattering the live MPD facade, the config tree, the resume-state
//! file and the metadata cache across process globals, every service gets
//! an `Arc<AppContext>` at construction.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use upmpmeta::MetaCache;
use upmpmpd::facade::Mpd;

/// The "currently live" MPD facade, swappable under a lock so a songcast
/// transition (spec.md §4.11) can replace it atomically without any
/// service needing to know (spec.md §3 invariant: "Exactly one MPD facade
/// is 'current' at any time; a songcast transition swaps it atomically").
pub struct FacadeHandle {
    current: RwLock<Arc<dyn Mpd>>,
}

impl FacadeHandle {
    pub fn new(facade: Arc<dyn Mpd>) -> Self {
        FacadeHandle {
            current: RwLock::new(facade),
        }
    }

    pub async fn current(&self) -> Arc<dyn Mpd> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn swap(&self, facade: Arc<dyn Mpd>) -> Arc<dyn Mpd> {
        let mut guard = self.current.write().await;
        std::mem::replace(&mut *guard, facade)
    }
}

/// Resume hints persisted across restarts (spec.md §6 `upmstate`): last
/// active source name, last radio channel reference, and anything else a
/// service wants to remember keyed by a short name.
pub struct ResumeState {
    path: PathBuf,
}

impl ResumeState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ResumeState { path: path.into() }
    }

    fn load(&self) -> upmpconfig::ConfSimple {
        upmpconfig::ConfSimple::from_file(&self.path, upmpconfig::Flags::NONE)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.load().get(key, "")
    }

    pub fn set(&self, key: &str, value: &str) {
        let mut store = self.load();
        if store.set(key, value, "").is_err() {
            tracing::warn!(key, "failed to persist resume hint to {}", self.path.display());
        }
    }
}

/// Everything constructed once at startup and shared by every service.
pub struct AppContext {
    pub facade: FacadeHandle,
    pub meta: Arc<MetaCache>,
    pub resume: ResumeState,
    pub cache_dir: PathBuf,
    pub own_queue: bool,
}

impl AppContext {
    pub fn new(facade: Arc<dyn Mpd>, meta: Arc<MetaCache>, cache_dir: impl Into<PathBuf>, own_queue: bool) -> Arc<Self> {
        let cache_dir = cache_dir.into();
        let resume = ResumeState::new(cache_dir.join("upmstate"));
        Arc::new(AppContext {
            facade: FacadeHandle::new(facade),
            meta,
            resume,
            cache_dir,
            own_queue,
        })
    }
}
