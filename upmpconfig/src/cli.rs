//! Command-line flags, mirroring `upmpdcli`'s original getopt set
//! (spec.md §6) plus the ambient `--version`/`--help` clap gives us for free.

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(name = "upmpd", version, about = "MPD to UPnP/OpenHome media renderer bridge")]
pub struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config")]
    pub config_file: Option<String>,

    /// MPD host
    #[arg(short = 'h', long = "mpdhost")]
    pub mpd_host: Option<String>,

    /// MPD port
    #[arg(short = 'p', long = "mpdport")]
    pub mpd_port: Option<u16>,

    /// Log file ('-' or omitted logs to stdout)
    #[arg(short = 'd', long = "logfile")]
    pub log_file: Option<String>,

    /// Log level: fatal, error, warn, info, debug, debug1, debug2
    #[arg(short = 'l', long = "loglevel")]
    pub log_level: Option<String>,

    /// Daemonize
    #[arg(short = 'D', long = "daemonize")]
    pub daemonize: bool,

    /// Friendly name (supports %h, %H, %v)
    #[arg(short = 'f', long = "friendlyname")]
    pub friendly_name: Option<String>,

    /// Own the MPD queue (0/1)
    #[arg(short = 'q', long = "ownqueue")]
    pub own_queue: Option<u8>,

    /// Network interface to bind to
    #[arg(short = 'i', long = "iface")]
    pub iface: Option<String>,

    /// UPnP port
    #[arg(short = 'P', long = "upnpport")]
    pub upnp_port: Option<u16>,

    /// Enable OpenHome services (0/1)
    #[arg(short = 'O', long = "openhome")]
    pub openhome: Option<u8>,

    /// Media-server mode (0..4); only 1 (renderer-only) is relevant to this core
    #[arg(short = 'm', long = "msmode")]
    pub ms_mode: Option<u8>,
}

/// Translate `-l`/`loglevel` into a `tracing`-compatible filter directive.
pub fn log_level_to_filter(level: &str) -> &'static str {
    match level {
        "fatal" => "error",
        "error" => "error",
        "warn" => "warn",
        "info" => "info",
        "debug" => "debug",
        "debug1" => "debug",
        "debug2" => "trace",
        _ => "info",
    }
}
