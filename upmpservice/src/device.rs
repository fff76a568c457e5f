//! Root device assembly (spec.md §2 item 6): builds every service from one
//! [`AppContext`] and an [`upmpconfig::AppConfig`], wires the MPD facade's
//! event subscription to the services that need to refresh on it, and hands
//! back one `Arc<Device>` a binary entry point can dispatch actions against.
//!
//! There is no giant `match` over action names here: a real UPnP/OpenHome
//! transport layer (SOAP/XML over HTTP, eventing over GENA) is the
//! "device-layer" plumbing spec.md §1 excludes ("HTTP server, SOAP/XML
//! (de)serialization... network transport are all out of scope"). What
//! remains in scope, and is implemented below, is everything upstream of
//! that boundary: constructing the services, keeping them in sync with MPD,
//! and exposing them so a dispatcher can call straight through.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use upmpconfig::AppConfig;
use upmpmpd::facade::{SubscriberFn, EVENT_SUBS};
use upmpmpd::status::MpdStatus;

use crate::context::AppContext;
use crate::error::Result;
use crate::eventsink::EventSink;
use crate::services::connmgr::default_sink_formats;
use crate::services::radio::RadioChannel;
use crate::services::transport::UriMetadataLookup;
use crate::services::{
    discover_external_sources, ConnectionManagerService, CredentialsService, ExternalSource, InfoService, PlaylistService,
    ProductService, RadioService, SongcastOrchestrator, TimeService, TransportCompatService, VolumeService,
};

/// One assembled device: every service plus the shared context, ready to
/// receive actions and MPD-driven refreshes.
pub struct Device {
    pub ctx: Arc<AppContext>,
    pub connmgr: Arc<ConnectionManagerService>,
    pub info: Arc<InfoService>,
    pub time: Arc<TimeService>,
    pub volume: Arc<VolumeService>,
    pub transport: Arc<TransportCompatService>,
    pub playlist: Arc<PlaylistService>,
    pub radio: Option<Arc<RadioService>>,
    pub songcast: Option<Arc<SongcastOrchestrator>>,
    pub product: Arc<ProductService>,
    pub credentials: Option<Arc<CredentialsService>>,
    pub openhome_enabled: bool,
    pub upnpav_enabled: bool,
    pub friendly_name: String,
}

impl Device {
    pub async fn new(ctx: Arc<AppContext>, cfg: &AppConfig, sink: Arc<dyn EventSink>) -> Result<Arc<Self>> {
        let friendly_name = cfg.friendly_name();

        let connmgr = Arc::new(ConnectionManagerService::new(default_sink_formats(), sink.clone()));
        let collapse_metatext = cfg.tree().inner().get_bool("ohinfocollapse", "", false);
        let info = Arc::new(InfoService::new(ctx.clone(), collapse_metatext, sink.clone()));
        let time = Arc::new(TimeService::new(ctx.clone(), sink.clone()));
        let volume = Arc::new(VolumeService::new(ctx.clone(), sink.clone()));
        let transport = Arc::new(TransportCompatService::new(
            ctx.clone(),
            connmgr.clone(),
            cfg.check_content_format(),
            cfg.avtautoplay(),
            cfg.keep_consume(),
            sink.clone(),
        ));
        let playlist = Arc::new(PlaylistService::new(ctx.clone(), sink.clone()));

        let radio = match cfg.radio_list_file() {
            Some(path) => {
                let channels = load_radio_channels(Path::new(&path));
                let stream_resolver = cfg.helper_command("radioscript");
                let svc = Arc::new(RadioService::new(ctx.clone(), info.clone(), transport.clone(), channels, stream_resolver, sink.clone()));
                svc.restore_last_channel().await;
                svc.start_refresh_task();
                Some(svc)
            }
            None => None,
        };

        let songcast = if cfg.sc_no_songcast_source() {
            None
        } else {
            Some(Arc::new(SongcastOrchestrator::new(
                ctx.clone(),
                cfg.sc_sender_path(),
                cfg.sc_sender_mpd_port(),
                cfg.mpd_host(),
                cfg.mpd_password().unwrap_or_default(),
                Duration::from_millis(cfg.mpd_timeout_ms()),
                Duration::from_secs(cfg.sc_script_grace_secs()),
            )))
        };

        let externals: Vec<ExternalSource> = cfg
            .oh_src_scripts_dir()
            .map(|dir| discover_external_sources(Path::new(&dir)))
            .unwrap_or_default();

        let receiver_enabled = cfg.tree().inner().get_bool("ohreceiver", "", false);
        let standby_cmd = cfg.helper_command("ohproductstandbycmd");

        let product = Arc::new(ProductService::new(
            ctx.clone(),
            playlist.clone(),
            radio.clone(),
            songcast.clone(),
            externals,
            receiver_enabled,
            standby_cmd,
            friendly_name.clone(),
            sink.clone(),
        ));
        product.restore_last_source().await;

        let credentials = if cfg.openhome_enabled() {
            let ids = cfg
                .tree()
                .inner()
                .get("ohcredentialsids", "")
                .unwrap_or_else(|| crate::services::credentials::DEFAULT_IDS.to_string())
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>();
            let login_helper = cfg.helper_command("ohcredentialslogin");
            let save_to_file = cfg.save_oh_credentials() == "file";
            Some(Arc::new(
                CredentialsService::new(ctx.clone(), ids, login_helper, save_to_file, cfg.lumincompat(), sink.clone()).await?,
            ))
        } else {
            None
        };

        let device = Arc::new(Device {
            ctx,
            connmgr,
            info,
            time,
            volume,
            transport,
            playlist,
            radio,
            songcast,
            product,
            credentials,
            openhome_enabled: cfg.openhome_enabled(),
            upnpav_enabled: cfg.upnpav_enabled(),
            friendly_name,
        });

        device.subscribe_to_mpd().await;
        device.refresh_all().await;
        info!(friendly_name = %device.friendly_name, "device assembled");
        Ok(device)
    }

    /// Hooks every service that needs to track MPD's own idle/poller events
    /// onto the facade's subscription mechanism (spec.md §4.2 `subscribe`):
    /// one callback, fanned out with a spawned refresh per service so a
    /// slow service can't stall the others or the facade's lock.
    async fn subscribe_to_mpd(self: &Arc<Self>) {
        let device = Arc::clone(self);
        let callback: SubscriberFn = Arc::new(move |_status: &MpdStatus| {
            let device = Arc::clone(&device);
            tokio::spawn(async move {
                device.refresh_all().await;
            });
        });
        let mask = EVENT_SUBS.iter().fold(0, |acc, bit| acc | bit);
        self.ctx.facade.current().await.subscribe(mask, callback).await;
    }

    /// Refreshes every service against the facade's current status. Also
    /// doubles as the initial full-state sync on startup: each service's
    /// [`crate::servicebase::ServiceBase`] diffs against an empty previous
    /// snapshot on its very first call, so the first `refresh_all` already
    /// emits every eventable variable (spec.md §4.3 "a subscriber joining
    /// gets the full current state").
    pub async fn refresh_all(&self) {
        self.playlist.refresh().await;
        let lookup: &dyn UriMetadataLookup = self.playlist.as_ref();
        self.transport.refresh(Some(lookup)).await;
        self.volume.refresh().await;
        self.info.refresh().await;
        self.time.refresh().await;
        self.connmgr.refresh().await;
        self.product.refresh().await;
        if let Some(radio) = &self.radio {
            radio.refresh().await;
        }
        if let Some(credentials) = &self.credentials {
            credentials.refresh().await;
        }
    }
}

/// Reads a `radiolist`-style INI file (SPEC_FULL §4.9 supplement): one
/// section per channel, named by its title, with `url`/`artUrl`/
/// `artScript`/`metaScript`/`preferScript` keys. A missing or unreadable
/// file yields no channels rather than an error — the radio service is
/// simply absent from the source list in that case.
fn load_radio_channels(path: &Path) -> Vec<RadioChannel> {
    let conf = upmpconfig::ConfSimple::from_file(path, upmpconfig::Flags::NONE);
    conf.get_sub_keys()
        .into_iter()
        .filter(|section| !section.is_empty())
        .map(|section| RadioChannel {
            title: section.clone(),
            url: conf.get("url", &section).unwrap_or_default(),
            art_url: conf.get("artUrl", &section).unwrap_or_default(),
            art_script: conf.get("artScript", &section),
            meta_script: conf.get("metaScript", &section),
            prefer_script: conf.get_bool("preferScript", &section, false),
        })
        .collect()
}
