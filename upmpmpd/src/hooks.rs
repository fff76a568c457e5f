//! External helper command invocation: on-xxx transition hooks and the
//! optional external volume helper pair (spec.md §4.2 "Volume special
//! cases", "on-xxx hooks").

use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

/// Commands configured to run on MPD state transitions, plus the optional
/// external volume read/write helpers. Every field is best-effort: failures
/// are logged, never propagated (spec.md §4.2, §7 *helper-failure*).
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub on_start: Option<String>,
    pub on_play: Option<String>,
    pub on_pause: Option<String>,
    pub on_stop: Option<String>,
    pub on_volume_change: Option<String>,
    pub get_external_volume: Option<String>,
    pub external_volume_control: bool,
}

fn split_command(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Run a configured hook command and forget the result beyond logging.
pub(crate) async fn run_hook(command: &Option<String>, context: &str) {
    let Some(command) = command else { return };
    let Some((program, args)) = split_command(command) else {
        return;
    };
    match Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) if !status.success() => {
            warn!("{context} hook `{command}` exited with {status}");
        }
        Err(e) => warn!("failed to spawn {context} hook `{command}`: {e}"),
        Ok(_) => {}
    }
}

/// Run `on_volume_change`, passing the new volume as argv.
pub(crate) async fn run_volume_change_hook(command: &Option<String>, volume: i32) {
    let Some(command) = command else { return };
    let Some((program, mut args)) = split_command(command) else {
        return;
    };
    let vol = volume.to_string();
    args.push(&vol);
    if let Err(e) = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        warn!("failed to spawn on_volume_change hook `{command}`: {e}");
    }
}

/// Run the external-volume-read helper and parse its first line as 0..=100.
pub(crate) async fn read_external_volume(command: &str) -> Option<i32> {
    let (program, args) = split_command(command)?;
    let output = Command::new(program).args(&args).output().await.ok()?;
    if !output.status.success() {
        warn!("get_external_volume helper `{command}` exited with {}", output.status);
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines().next()?.trim().parse::<i32>().ok().map(|v| v.clamp(0, 100))
}
