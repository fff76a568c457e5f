//! `upmpd` — the MPD to UPnP/OpenHome media renderer bridge daemon
//! (spec.md §1, §6 CLI). Wires the CLI flags and configuration file
//! through [`upmpconfig`] into a live [`upmpmpd::MpdFacade`], assembles
//! the service layer via [`upmpservice::Device`], and runs until asked to
//! stop.
//!
//! The eventing/description/discovery transport this binary would hand
//! the assembled device to is an external collaborator (spec.md §1); this
//! binary stops at [`upmpservice::LogEventSink`], the boundary a real
//! SSDP/GENA/HTTP stack would plug into.

mod logging;
mod pidfile;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use upmpconfig::{AppConfig, Cli};
use upmpmeta::MetaCache;
use upmpmpd::{Hooks, MpdFacade};
use upmpservice::{AppContext, Device, LogEventSink};

use pidfile::Pidfile;

const MPD_CONNECT_RETRIES: u32 = 5;
const MPD_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);
const METACACHE_FLUSH_THROTTLE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = AppConfig::load(cli.clone());

    logging::init(&cfg.log_level(), cfg.log_file().as_deref());

    let pidfile = Pidfile::new(cfg.pid_file());
    if let Err(reason) = pidfile.acquire() {
        error!("{reason}");
        return ExitCode::FAILURE;
    }

    if cli.daemonize {
        #[cfg(unix)]
        {
            // SAFETY: daemon(3) forks, detaches from the controlling terminal
            // and re-execs nothing; called once, before any other thread
            // (tokio runtime) exists.
            if unsafe { libc::daemon(1, 0) } != 0 {
                error!("daemonize failed: {}", std::io::Error::last_os_error());
                pidfile.release();
                return ExitCode::FAILURE;
            }
            // The fork changed our pid; the file we wrote above now names
            // the parent that just exited.
            if let Err(reason) = pidfile.write_pid() {
                error!("{reason}");
                return ExitCode::FAILURE;
            }
        }
        #[cfg(not(unix))]
        {
            warn!("-D/--daemonize has no effect on this platform, running in the foreground");
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start async runtime: {e}");
            pidfile.release();
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cfg));
    pidfile.release();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        friendly_name = %cfg.friendly_name(),
        mpd_host = %cfg.mpd_host(),
        mpd_port = cfg.mpd_port(),
        "starting upmpd"
    );

    let mpd_hooks = Hooks {
        on_start: cfg.helper_command("onstart"),
        on_play: cfg.helper_command("onplay"),
        on_pause: cfg.helper_command("onpause"),
        on_stop: cfg.helper_command("onstop"),
        on_volume_change: cfg.helper_command("onvolumechange"),
        get_external_volume: cfg.helper_command("getexternalvolume"),
        external_volume_control: cfg.helper_command("externalvolumecontrol").map(|v| v == "1").unwrap_or(false),
    };

    let timeout = Duration::from_millis(cfg.mpd_timeout_ms());
    let facade = connect_with_retries(&cfg, mpd_hooks, timeout).await?;
    let facade: Arc<dyn upmpmpd::facade::Mpd> = facade;

    std::fs::create_dir_all(cfg.cache_dir())?;
    let meta = Arc::new(MetaCache::load(format!("{}/metacache", cfg.cache_dir()), METACACHE_FLUSH_THROTTLE).await?);

    let ctx = AppContext::new(facade, meta, cfg.cache_dir(), cfg.own_queue());
    let sink = Arc::new(LogEventSink);
    let device = Device::new(ctx.clone(), &cfg, sink).await?;

    startup::run_on_start(&cfg).await;

    info!(
        openhome = device.openhome_enabled,
        upnpav = device.upnpav_enabled,
        "device ready, awaiting shutdown signal"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    ctx.facade.current().await.should_exit();
    Ok(())
}

/// Keeps trying the initial MPD connection a bounded number of times
/// before giving up (spec.md §7 *fatal*-adjacent: MPD being down at
/// startup is not itself in the fatal list, but nothing downstream can be
/// assembled without one, so a bounded retry is the reasonable middle
/// ground between "retry forever" and "fail on the first hiccup").
async fn connect_with_retries(cfg: &AppConfig, hooks: Hooks, timeout: Duration) -> Result<Arc<MpdFacade>, upmpmpd::Error> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match MpdFacade::connect(&cfg.mpd_host(), cfg.mpd_port(), cfg.mpd_password().as_deref().unwrap_or(""), timeout, hooks.clone()).await {
            Ok(facade) => return Ok(facade),
            Err(e) if attempt < MPD_CONNECT_RETRIES => {
                warn!("MPD connection attempt {attempt}/{MPD_CONNECT_RETRIES} failed: {e}, retrying");
                tokio::time::sleep(MPD_CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

mod startup {
    use super::AppConfig;

    /// Fires the `onstart` hook once the device is fully assembled
    /// (spec.md §6 `onstart`); best-effort like every other on-xxx hook.
    pub async fn run_on_start(cfg: &AppConfig) {
        let Some(command) = cfg.helper_command("onstart") else {
            return;
        };
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else { return };
        if let Err(e) = tokio::process::Command::new(program).args(parts).spawn() {
            tracing::warn!("failed to spawn onstart hook `{command}`: {e}");
        }
    }
}
