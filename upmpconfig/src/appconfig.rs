//! Typed view over the configuration file + CLI flags + `UPMPD_` environment
//! overrides, exposing the keys enumerated in spec.md §6.

use std::collections::HashMap;
use std::env;

use crate::cli::Cli;
use crate::flags::Flags;
use crate::tree::ConfTree;

const ENV_PREFIX: &str = "UPMPD_";

pub struct AppConfig {
    tree: ConfTree,
    env_overrides: HashMap<String, String>,
    cli: Cli,
}

impl AppConfig {
    pub fn load(cli: Cli) -> Self {
        let tree = match &cli.config_file {
            Some(path) => ConfTree::from_file(path, Flags::NONE),
            None => ConfTree::empty(Flags::NONE),
        };
        let env_overrides = env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX).map(|name| (name.to_lowercase(), v))
            })
            .collect();
        AppConfig {
            tree,
            env_overrides,
            cli,
        }
    }

    pub fn tree(&self) -> &ConfTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ConfTree {
        &mut self.tree
    }

    fn raw(&self, key: &str) -> Option<String> {
        self.env_overrides
            .get(key)
            .cloned()
            .or_else(|| self.tree.get(key, ""))
    }

    pub fn mpd_host(&self) -> String {
        self.cli
            .mpd_host
            .clone()
            .or_else(|| self.raw("mpdhost"))
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn mpd_port(&self) -> u16 {
        self.cli
            .mpd_port
            .or_else(|| self.raw("mpdport").and_then(|v| v.parse().ok()))
            .unwrap_or(6600)
    }

    pub fn mpd_password(&self) -> Option<String> {
        self.raw("mpdpassword")
    }

    pub fn mpd_timeout_ms(&self) -> u64 {
        self.raw("mpdtimeoutms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000)
    }

    /// Expand `%h` (host), `%H` (capitalized host), `%v` (version).
    pub fn friendly_name(&self) -> String {
        let template = self
            .cli
            .friendly_name
            .clone()
            .or_else(|| self.raw("friendlyname"))
            .unwrap_or_else(|| "UpMpd-%h".to_string());
        let host = hostname();
        let cap_host = {
            let mut c = host.chars();
            match c.next() {
                Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                None => host.clone(),
            }
        };
        template
            .replace("%H", &cap_host)
            .replace("%h", &host)
            .replace("%v", env!("CARGO_PKG_VERSION"))
    }

    pub fn openhome_enabled(&self) -> bool {
        self.cli
            .openhome
            .map(|v| v != 0)
            .or_else(|| self.raw("openhome").map(|v| v == "1" || v.eq_ignore_ascii_case("true")))
            .unwrap_or(true)
    }

    pub fn upnpav_enabled(&self) -> bool {
        self.raw("upnpav")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true)
    }

    pub fn own_queue(&self) -> bool {
        self.cli
            .own_queue
            .map(|v| v != 0)
            .or_else(|| self.raw("ownqueue").map(|v| v == "1"))
            .unwrap_or(true)
    }

    pub fn avtautoplay(&self) -> bool {
        self.raw("avtautoplay").map(|v| v == "1").unwrap_or(false)
    }

    pub fn keep_consume(&self) -> bool {
        self.raw("keepconsume").map(|v| v == "1").unwrap_or(false)
    }

    pub fn check_content_format(&self) -> bool {
        self.raw("checkcontentformat").map(|v| v == "1").unwrap_or(true)
    }

    pub fn oh_meta_persist(&self) -> bool {
        self.raw("ohmetapersist").map(|v| v == "1").unwrap_or(true)
    }

    pub fn cache_dir(&self) -> String {
        self.raw("cachedir").unwrap_or_else(|| "/var/cache/upmpdcli".to_string())
    }

    pub fn pid_file(&self) -> String {
        self.raw("pidfile").unwrap_or_else(|| "/var/run/upmpdcli.pid".to_string())
    }

    pub fn log_file(&self) -> Option<String> {
        self.cli.log_file.clone().or_else(|| self.raw("logfilename"))
    }

    pub fn log_level(&self) -> String {
        self.cli
            .log_level
            .clone()
            .or_else(|| self.raw("loglevel"))
            .unwrap_or_else(|| "info".to_string())
    }

    pub fn helper_command(&self, key: &str) -> Option<String> {
        self.raw(key)
    }

    pub fn save_oh_credentials(&self) -> String {
        self.raw("saveohcredentials").unwrap_or_else(|| "file".to_string())
    }

    pub fn lumincompat(&self) -> bool {
        self.raw("lumincompat").map(|v| v == "1").unwrap_or(false)
    }

    pub fn sc_http_port(&self) -> Option<u16> {
        self.raw("schttpport").and_then(|v| v.parse().ok())
    }

    pub fn sc_play_method(&self) -> Option<String> {
        self.raw("scplaymethod")
    }

    pub fn sc_sender_path(&self) -> Option<String> {
        self.raw("scsenderpath")
    }

    pub fn sc_sender_mpd_port(&self) -> Option<u16> {
        self.raw("scsendermpdport").and_then(|v| v.parse().ok())
    }

    pub fn sc_no_songcast_source(&self) -> bool {
        self.raw("scnosongcastsource").map(|v| v == "1").unwrap_or(false)
    }

    pub fn sc_stream_scaled(&self) -> bool {
        self.raw("scstreamscaled").map(|v| v == "1").unwrap_or(false)
    }

    pub fn sc_script_grace_secs(&self) -> u64 {
        self.raw("scscriptgracesecs").and_then(|v| v.parse().ok()).unwrap_or(3)
    }

    pub fn oh_src_scripts_dir(&self) -> Option<String> {
        self.raw("ohsrc_scripts_dir")
    }

    pub fn radio_list_file(&self) -> Option<String> {
        self.raw("radiolist")
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            #[cfg(unix)]
            {
                std::process::Command::new("hostname")
                    .output()
                    .ok()
                    .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            }
            #[cfg(not(unix))]
            {
                None
            }
        })
        .unwrap_or_else(|| "localhost".to_string())
}
