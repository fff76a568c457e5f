//! Log setup (spec.md §7 "User-visible: log messages via a level-gated
//! logger"): one `tracing-subscriber` `fmt` layer, filtered by the
//! `-l`/`loglevel` flag translated through [`upmpconfig::log_level_to_filter`],
//! writing to stdout or to the configured log file.

use std::fs::OpenOptions;
use tracing_subscriber::EnvFilter;

pub fn init(level: &str, log_file: Option<&str>) {
    let filter = EnvFilter::try_new(upmpconfig::log_level_to_filter(level)).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file.filter(|f| *f != "-") {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path);
            match file {
                Ok(file) => {
                    tracing_subscriber::fmt().with_env_filter(filter).with_writer(file).with_ansi(false).init();
                }
                Err(e) => {
                    tracing_subscriber::fmt().with_env_filter(filter).init();
                    tracing::warn!("cannot open log file {path}: {e}, logging to stdout instead");
                }
            }
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
