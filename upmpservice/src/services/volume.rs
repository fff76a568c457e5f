//! Volume-compat service (spec.md §4.6): wraps the MPD facade's volume
//! with the RenderingControl-style absolute volume + mute contract.

use std::sync::Arc;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};

pub const FACTORY_DEFAULTS: &str = "FactoryDefaults";
const FACTORY_DEFAULT_VOLUME: i32 = 50;

pub struct VolumeService {
    base: ServiceBase,
    ctx: Arc<AppContext>,
}

impl VolumeService {
    pub fn new(ctx: Arc<AppContext>, sink: Arc<dyn EventSink>) -> Self {
        VolumeService {
            base: ServiceBase::new("VolumeCompat", sink),
            ctx,
        }
    }

    pub async fn make_state(&self) -> StateMap {
        let status = self.ctx.facade.current().await.status().await;
        let volume = status.volume.unwrap_or(0);
        vec![
            ("Volume".to_string(), volume.to_string()),
            ("Mute".to_string(), (volume == 0).to_string()),
        ]
    }

    pub async fn refresh(&self) {
        let state = self.make_state().await;
        self.base.on_event(state).await;
    }

    pub async fn get_volume(&self) -> i32 {
        self.ctx.facade.current().await.status().await.volume.unwrap_or(0)
    }

    pub async fn set_volume(&self, volume: i32) -> Result<()> {
        if !(0..=100).contains(&volume) {
            return Err(Error::Validation(format!("volume {volume} out of range 0..=100")));
        }
        self.ctx.facade.current().await.set_volume(volume, false).await?;
        self.refresh().await;
        Ok(())
    }

    pub async fn get_mute(&self) -> bool {
        self.get_volume().await == 0
    }

    /// `setMute(true)` followed by `setMute(false)` restores exactly the
    /// pre-mute volume (Testable property 6, §8 Scenario D), delegated to
    /// the facade's pre-mute recall.
    pub async fn set_mute(&self, on: bool) -> Result<()> {
        let target = if on { 0 } else { 1 };
        self.ctx.facade.current().await.set_volume(target, true).await?;
        self.refresh().await;
        Ok(())
    }

    pub fn presets(&self) -> Vec<&'static str> {
        vec![FACTORY_DEFAULTS]
    }

    pub async fn select_preset(&self, name: &str) -> Result<()> {
        if name != FACTORY_DEFAULTS {
            return Err(Error::Validation(format!("unknown volume preset {name:?}")));
        }
        self.set_volume(FACTORY_DEFAULT_VOLUME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventsink::MemoryEventSink;
    use upmpmeta::MetaCache;
    use upmpmpd::fake::FakeMpd;

    async fn context() -> Arc<AppContext> {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaCache::load(dir.path().join("meta"), std::time::Duration::from_millis(1)).await.unwrap());
        AppContext::new(Arc::new(FakeMpd::new()), meta, dir.path().to_path_buf(), true)
    }

    #[tokio::test]
    async fn mute_then_unmute_restores_volume() {
        let ctx = context().await;
        let sink = Arc::new(MemoryEventSink::new());
        let svc = VolumeService::new(ctx, sink);
        svc.set_volume(40).await.unwrap();
        svc.set_mute(true).await.unwrap();
        assert_eq!(svc.get_volume().await, 0);
        assert!(svc.get_mute().await);
        svc.set_mute(false).await.unwrap();
        assert_eq!(svc.get_volume().await, 40);
    }

    #[tokio::test]
    async fn rejects_out_of_range_volume() {
        let ctx = context().await;
        let sink = Arc::new(MemoryEventSink::new());
        let svc = VolumeService::new(ctx, sink);
        assert!(svc.set_volume(101).await.is_err());
        assert!(svc.set_volume(-1).await.is_err());
    }

    #[tokio::test]
    async fn factory_defaults_preset_resets_to_fifty() {
        let ctx = context().await;
        let sink = Arc::new(MemoryEventSink::new());
        let svc = VolumeService::new(ctx, sink);
        svc.set_volume(10).await.unwrap();
        svc.select_preset(FACTORY_DEFAULTS).await.unwrap();
        assert_eq!(svc.get_volume().await, 50);
    }
}
