//! Integration tests for spec.md §8's lettered end-to-end scenarios (A-F),
//! driving the real services against `upmpmpd::fake::FakeMpd` rather than a
//! live `mpd` binary (SPEC_FULL.md's test-tooling supplement).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;

use upmpdidl::{SongDescriptor, SongResource};
use upmpmeta::MetaCache;
use upmpmpd::fake::FakeMpd;
use upmpmpd::status::TransportState;

use upmpservice::eventsink::MemoryEventSink;
use upmpservice::services::connmgr::{default_sink_formats, ConnectionManagerService};
use upmpservice::services::credentials::{CredentialsService, DEFAULT_IDS};
use upmpservice::services::info::InfoService;
use upmpservice::services::playlist::PlaylistService;
use upmpservice::services::radio::{RadioChannel, RadioService};
use upmpservice::services::transport::TransportCompatService;
use upmpservice::AppContext;

async fn context(own_queue: bool) -> (Arc<AppContext>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let meta = Arc::new(MetaCache::load(dir.path().join("meta"), Duration::from_millis(1)).await.unwrap());
    let ctx = AppContext::new(Arc::new(FakeMpd::new()), meta, dir.path().to_path_buf(), own_queue);
    (ctx, dir)
}

fn didl_for(title: &str, uri: &str, mime: &str) -> String {
    let song = SongDescriptor {
        id: "0".into(),
        parent_id: "0".into(),
        title: title.into(),
        resource: SongResource {
            uri: uri.into(),
            mime: mime.into(),
            ..Default::default()
        },
        ..Default::default()
    };
    song.to_didl_string().unwrap()
}

/// All (name, value) pairs ever notified for `service`, flattened across
/// every event (not just the last), since a scenario's expected attributes
/// may have landed on different diffs.
fn all_changes_for(sink: &MemoryEventSink, service: &str) -> Vec<(String, String)> {
    sink.events().into_iter().filter(|(s, _)| s == service).flat_map(|(_, c)| c).collect()
}

#[cfg(unix)]
fn write_executable_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Scenario A (spec.md §8): `SetAVTransportURI` then `Play` brings MPD's
/// queue to the one URI, transitions to PLAYING, and the cumulative
/// `LastChange` stream carries both the URI and the new transport state.
#[tokio::test]
async fn scenario_a_transport_compat_play() {
    let (ctx, _dir) = context(true).await;
    let sink = Arc::new(MemoryEventSink::new());
    let connmgr = Arc::new(ConnectionManagerService::new(default_sink_formats(), sink.clone()));
    let transport = TransportCompatService::new(ctx.clone(), connmgr, true, false, false, sink.clone());

    let metadata = didl_for("A Track", "http://host/a.mp3", "audio/mpeg");
    transport.set_av_transport_uri("http://host/a.mp3", &metadata).await.unwrap();
    transport.play().await.unwrap();

    let queue = ctx.facade.current().await.get_queue_data().await.unwrap();
    assert_eq!(queue.iter().map(|s| s.resource.uri.clone()).collect::<Vec<_>>(), vec!["http://host/a.mp3"]);
    assert!(matches!(ctx.facade.current().await.status().await.state, TransportState::Playing));

    let changes = all_changes_for(&sink, "AVTransport");
    assert!(changes.contains(&("TransportState".to_string(), "PLAYING".to_string())));
    assert!(changes.contains(&("AVTransportURI".to_string(), "http://host/a.mp3".to_string())));
}

/// Scenario B (spec.md §8): with queue `[A, B]` at position 0,
/// `SetNextAVTransportURI(C1)` then `SetNextAVTransportURI(C2)` leaves the
/// queue at `[A, C2]` — only the most recent "next" survives.
#[tokio::test]
async fn scenario_b_setnext_two_track_trim() {
    let (ctx, _dir) = context(true).await;
    let sink = Arc::new(MemoryEventSink::new());
    let connmgr = Arc::new(ConnectionManagerService::new(default_sink_formats(), sink.clone()));
    let transport = TransportCompatService::new(ctx.clone(), connmgr, false, false, false, sink.clone());

    let facade = ctx.facade.current().await;
    facade.insert("A", None, None).await.unwrap();
    facade.insert("B", None, None).await.unwrap();
    facade.play(Some(0)).await.unwrap();

    transport.set_next_av_transport_uri("C1", "").await.unwrap();
    transport.set_next_av_transport_uri("C2", "").await.unwrap();

    let queue = facade.get_queue_data().await.unwrap();
    assert_eq!(queue.iter().map(|s| s.resource.uri.clone()).collect::<Vec<_>>(), vec!["A", "C2"]);
}

/// Scenario C (spec.md §8): inserting into an empty queue returns a new id;
/// `IdArray` returns a token and that id; `IdArrayChanged` against that
/// token is false until a further mutation bumps it.
#[tokio::test]
async fn scenario_c_playlist_insert_and_id_array_event() {
    let (ctx, _dir) = context(true).await;
    let sink = Arc::new(MemoryEventSink::new());
    let svc = PlaylistService::new(ctx, sink);

    let i1 = svc.insert(0, "u1", &didl_for("T1", "u1", "audio/mpeg")).await.unwrap();
    let (token, array) = svc.id_array().await;
    assert_eq!(upmpservice::services::common::decode_id_array(&array), vec![i1]);
    assert!(!svc.id_array_changed(token));

    svc.insert(0, "u2", &didl_for("T2", "u2", "audio/mpeg")).await.unwrap();
    assert!(svc.id_array_changed(token));
    let (token2, _) = svc.id_array().await;
    assert!(!svc.id_array_changed(token2));
}

/// Scenario D (spec.md §8): starting at volume 40, `SetMute(true)` reads
/// back as 0; `SetMute(false)` restores exactly 40.
#[tokio::test]
async fn scenario_d_mute_round_trip() {
    let (ctx, _dir) = context(true).await;
    let facade = ctx.facade.current().await;
    facade.set_volume(40, false).await.unwrap();

    facade.set_volume(0, true).await.unwrap();
    assert_eq!(facade.get_volume().await.unwrap(), 0);

    facade.set_volume(1, true).await.unwrap();
    assert_eq!(facade.get_volume().await.unwrap(), 40);
}

/// Scenario E (spec.md §8): a channel with a static URL resolves through
/// the stream-URL resolver helper, inserts the resolved URL at position 0,
/// sets MPD single-mode on, and plays.
#[tokio::test]
#[cfg(unix)]
async fn scenario_e_radio_static_channel_play() {
    let (ctx, dir) = context(true).await;
    let sink = Arc::new(MemoryEventSink::new());
    let connmgr = Arc::new(ConnectionManagerService::new(default_sink_formats(), sink.clone()));
    let transport = Arc::new(TransportCompatService::new(ctx.clone(), connmgr, false, false, false, sink.clone()));
    let info = Arc::new(InfoService::new(ctx.clone(), false, sink.clone()));

    let resolver = write_executable_script(dir.path(), "resolver.sh", "#!/bin/sh\necho http://resolved.example/stream.mp3\n");

    let channels = vec![
        RadioChannel::default(), // channel 0: control-point ad hoc slot
        RadioChannel {
            title: "Station One".to_string(),
            url: "http://station/pls".to_string(),
            ..Default::default()
        },
    ];
    let radio = RadioService::new(ctx.clone(), info, transport, channels, Some(resolver.to_string_lossy().to_string()), sink);

    radio.set_id_and_play(1).await.unwrap();

    let facade = ctx.facade.current().await;
    let queue = facade.get_queue_data().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].resource.uri, "http://resolved.example/stream.mp3");
    let status = facade.status().await;
    assert!(status.single, "radio static-channel play must set MPD single-mode on");
    assert!(matches!(status.state, TransportState::Playing));
}

/// Scenario F (spec.md §8): `Set` decrypts a control-point-OAEP-encrypted
/// password, stores the record, bumps the sequence number and emits it;
/// `Login` then invokes the helper with the decrypted username/password and
/// returns its token.
#[tokio::test]
#[cfg(unix)]
async fn scenario_f_credentials_set_and_login() {
    let (ctx, dir) = context(true).await;
    let sink = Arc::new(MemoryEventSink::new());
    let ids: Vec<String> = DEFAULT_IDS.split_whitespace().map(str::to_string).collect();

    let login_helper = write_executable_script(
        dir.path(),
        "login.sh",
        "#!/bin/sh\nread -r user\nread -r pass\necho \"token-for-$user-$pass\"\n",
    );

    let svc = CredentialsService::new(ctx, ids, Some(login_helper.to_string_lossy().to_string()), true, false, sink.clone())
        .await
        .unwrap();

    let public_key = RsaPublicKey::from_public_key_pem(svc.public_key_pem()).unwrap();
    let mut rng = rand_core::OsRng;
    let ciphertext = public_key.encrypt(&mut rng, Oaep::new::<Sha256>(), b"p".as_slice()).unwrap();
    let encrypted = STANDARD.encode(ciphertext);

    svc.set("qobuz.com", "u", &encrypted).await.unwrap();
    let (username, enabled) = svc.get("qobuz.com").await.unwrap();
    assert_eq!(username, "u");
    assert!(enabled);
    assert_eq!(svc.sequence_number(), 2);
    assert_eq!(
        all_changes_for(&sink, "Credentials"),
        vec![("SequenceNumber".to_string(), "2".to_string())]
    );

    let token = svc.login("qobuz.com").await.unwrap();
    assert_eq!(token, "token-for-u-p");
}
