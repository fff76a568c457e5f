//! Songcast sender/receiver swap (spec.md §4.11): not an advertised
//! service, an orchestrator around the product selector's source switch.
//! Internal mode substitutes a secondary MPD facade for the live one;
//! external mode leaves the facade alone and just starts a script.

use std::process::Stdio;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::process::{Child, Command};
use tracing::debug;
use upmpmpd::facade::{Mpd, MpdFacade};
use upmpmpd::hooks::Hooks;

use crate::context::AppContext;
use crate::error::{Error, Result};

/// `Ok <port> URI <b64-uri> METADATA <b64-metadata>` as printed by both the
/// internal sender starter and an external source script (spec.md §6).
struct HelperLine {
    port: Option<u16>,
    uri: String,
    metadata: String,
}

fn parse_helper_line(line: &str) -> Option<HelperLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "Ok" {
        return None;
    }
    let mut port = None;
    let mut uri = String::new();
    let mut metadata = String::new();
    while let Some(tok) = tokens.next() {
        match tok {
            "URI" => uri = STANDARD.decode(tokens.next()?).ok().map(|b| String::from_utf8_lossy(&b).to_string())?,
            "METADATA" => metadata = STANDARD.decode(tokens.next()?).ok().map(|b| String::from_utf8_lossy(&b).to_string())?,
            other => port = other.parse().ok().or(port),
        }
    }
    Some(HelperLine { port, uri, metadata })
}

pub enum SongcastMode {
    Internal {
        facade: std::sync::Arc<MpdFacade>,
        child: Child,
    },
    External {
        child: Child,
    },
}

pub struct SongcastOrchestrator {
    ctx: std::sync::Arc<AppContext>,
    sender_path: Option<String>,
    sender_mpd_port: Option<u16>,
    mpd_host: String,
    mpd_password: String,
    timeout: Duration,
    grace: Duration,
    active: tokio::sync::Mutex<Option<SongcastMode>>,
    /// The facade in place before an internal swap, restored on stop.
    primary: tokio::sync::Mutex<Option<std::sync::Arc<dyn upmpmpd::facade::Mpd>>>,
}

impl SongcastOrchestrator {
    pub fn new(
        ctx: std::sync::Arc<AppContext>,
        sender_path: Option<String>,
        sender_mpd_port: Option<u16>,
        mpd_host: String,
        mpd_password: String,
        timeout: Duration,
        grace: Duration,
    ) -> Self {
        SongcastOrchestrator {
            ctx,
            sender_path,
            sender_mpd_port,
            mpd_host,
            mpd_password,
            timeout,
            grace,
            active: tokio::sync::Mutex::new(None),
            primary: tokio::sync::Mutex::new(None),
        }
    }

    /// Internal mode (spec.md §4.11): spawn the sender helper, open a
    /// secondary facade on the port it reports, transfer state and
    /// subscriptions, then swap it in as the live facade.
    pub async fn start_internal(&self) -> Result<()> {
        let path = self
            .sender_path
            .clone()
            .ok_or_else(|| Error::Validation("songcast sender path not configured".to_string()))?;

        let mut child = Command::new(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::HelperFailure(format!("failed to spawn songcast sender `{path}`: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| Error::HelperFailure("sender helper produced no stdout".to_string()))?;
        let line = read_first_line(stdout, self.timeout).await?;
        let parsed = parse_helper_line(&line)
            .ok_or_else(|| Error::HelperFailure(format!("unparseable songcast sender output: {line:?}")))?;
        let port = parsed.port.or(self.sender_mpd_port).ok_or_else(|| Error::HelperFailure("songcast sender reported no port".to_string()))?;
        debug!(uri = %parsed.uri, metadata_len = parsed.metadata.len(), "songcast sender reported stream identity");

        let secondary = MpdFacade::connect(&self.mpd_host, port, &self.mpd_password, self.timeout, Hooks::default())
            .await
            .map_err(Error::Mpd)?;
        // scstreamscaled drives MPD's own volume directly; don't let an
        // external volume helper fight it on this facade (SPEC_FULL §4.2).
        secondary.force_internal_vcontrol();

        let primary = self.ctx.facade.current().await;
        let saved = primary.save_state(None).await?;
        secondary.restore_state(&saved).await?;

        let previous = self.ctx.facade.swap(secondary.clone() as std::sync::Arc<dyn upmpmpd::facade::Mpd>).await;
        let subscribers = previous.take_subscribers().await;
        secondary.adopt_subscribers(subscribers).await;

        self.primary.lock().await.replace(previous);
        *self.active.lock().await = Some(SongcastMode::Internal { facade: secondary, child });
        Ok(())
    }

    /// External mode (spec.md §4.11): spawn the script with the
    /// friendly-name argument, leave the MPD facade untouched.
    pub async fn start_external(&self, script: &str, friendly_name: &str) -> Result<()> {
        let child = Command::new(script)
            .arg(friendly_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::HelperFailure(format!("failed to spawn songcast external source `{script}`: {e}")))?;
        *self.active.lock().await = Some(SongcastMode::External { child });
        Ok(())
    }

    /// On stop: copy state back from the secondary to the primary facade
    /// (internal mode only), kill the helper process, bounded by the
    /// configured grace timeout.
    pub async fn stop(&self) -> Result<()> {
        let Some(mode) = self.active.lock().await.take() else {
            return Ok(());
        };
        match mode {
            SongcastMode::Internal { facade, mut child } => {
                if let Some(primary) = self.primary.lock().await.take() {
                    let saved = facade.save_state(None).await.ok();
                    let swapped_out = self.ctx.facade.swap(primary.clone()).await;
                    let subscribers = swapped_out.take_subscribers().await;
                    primary.adopt_subscribers(subscribers).await;
                    if let Some(saved) = saved {
                        let _ = primary.restore_state(&saved).await;
                    }
                }
                self.kill_with_grace(&mut child).await;
            }
            SongcastMode::External { mut child } => {
                self.kill_with_grace(&mut child).await;
            }
        }
        Ok(())
    }

    async fn kill_with_grace(&self, child: &mut Child) {
        let _ = tokio::time::timeout(self.grace, child.wait()).await;
        let _ = child.start_kill();
    }
}

async fn read_first_line(stdout: tokio::process::ChildStdout, timeout: Duration) -> Result<String> {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| Error::HelperFailure("songcast sender did not report a line in time".to_string()))?
        .map_err(|e| Error::HelperFailure(format!("failed reading songcast sender output: {e}")))?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_line_with_all_tokens() {
        let uri_b64 = STANDARD.encode("http://host/stream.mp3");
        let meta_b64 = STANDARD.encode("<DIDL-Lite/>");
        let line = format!("Ok 4444 URI {uri_b64} METADATA {meta_b64}");
        let parsed = parse_helper_line(&line).unwrap();
        assert_eq!(parsed.port, Some(4444));
        assert_eq!(parsed.uri, "http://host/stream.mp3");
        assert_eq!(parsed.metadata, "<DIDL-Lite/>");
    }

    #[test]
    fn rejects_line_without_ok_prefix() {
        assert!(parse_helper_line("Err something went wrong").is_none());
    }
}
