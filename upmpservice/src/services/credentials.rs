//! Credentials service (spec.md §4.12): holds third-party streaming-service
//! logins on behalf of a control point, decrypting what it sends with a
//! keypair it generates and publishes.
//!
//! Unlike the teacher's own password-at-rest scheme
//! (`pmoconfig::encryption`, machine-UUID-derived AES-256-GCM — a
//! symmetric cipher, fine for "hide this from `cat config.ini`"), the
//! contract here is asymmetric: a control point encrypts with a public key
//! it fetched over the wire and never holds the private half, so AES-GCM
//! cannot satisfy it. RSA-OAEP is the teacher's own fallback whenever a
//! symmetric cipher won't do (see its `pmoconfig/examples/` helpers), so
//! we reach for `rsa` + `sha2` rather than inventing something new.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::warn;
use upmpconfig::{ConfSimple, Flags};

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::eventsink::EventSink;
use crate::servicebase::{ServiceBase, StateMap};

const KEY_BITS: usize = 2048;

/// Default set of recognized streaming-service ids (spec.md §4.12); more
/// may be registered through configuration.
pub const DEFAULT_IDS: &str = "tidalhifi.com qobuz.com";

#[derive(Debug, Clone, Default)]
struct CredentialRecord {
    username: String,
    /// Decrypted plaintext password, held only in memory and in the
    /// persistence store — never re-encrypted.
    password: String,
    /// The encrypted-password string as received, kept so a re-`Set` with
    /// an unchanged key is idempotent without re-decrypting.
    encrypted: String,
    enabled: bool,
}

/// Where a record's plaintext lands once decrypted (spec.md §4.12): a real
/// file (mode 0600) or a simplified in-memory stand-in for the shared
/// memory segment the original uses for a no-disk-write deployment. True
/// POSIX shared memory with an attach-side lock is out of scope (spec.md
/// §1 excludes "platform abstraction utilities... file locking"); the
/// in-memory `ConfSimple` document gives the same text-content contract to
/// any other in-process reader without the IPC machinery.
enum Backing {
    File(PathBuf),
    Memory(Mutex<ConfSimple>),
}

pub struct CredentialsService {
    base: ServiceBase,
    ids: Vec<String>,
    private_key: RsaPrivateKey,
    public_key_pem: String,
    login_helper: Option<String>,
    lumincompat: bool,
    backing: Backing,
    records: Mutex<std::collections::HashMap<String, CredentialRecord>>,
    sequence: AtomicU32,
}

impl CredentialsService {
    /// Loads (or generates and caches) the per-process keypair under
    /// `<cachedir>/ohcreds/credkey.pem`, then loads any persisted records
    /// from `<cachedir>/ohcreds/screds` (`save_to_file = true`) or starts
    /// an empty in-memory store otherwise.
    pub async fn new(
        ctx: Arc<AppContext>,
        ids: Vec<String>,
        login_helper: Option<String>,
        save_to_file: bool,
        lumincompat: bool,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let creds_dir = ctx.cache_dir.join("ohcreds");
        std::fs::create_dir_all(&creds_dir).map_err(|e| Error::HelperFailure(format!("cannot create {}: {e}", creds_dir.display())))?;

        let key_path = creds_dir.join("credkey.pem");
        let private_key = load_or_generate_key(&key_path)?;
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::HelperFailure(format!("failed to encode public key: {e}")))?;

        let backing = if save_to_file {
            Backing::File(creds_dir.join("screds"))
        } else {
            Backing::Memory(Mutex::new(ConfSimple::empty(Flags::NONE)))
        };

        let records = load_records(&backing, &ids).await;

        Ok(CredentialsService {
            base: ServiceBase::new("Credentials", sink),
            ids,
            private_key,
            public_key_pem,
            login_helper,
            lumincompat,
            backing,
            records: Mutex::new(records),
            sequence: AtomicU32::new(1),
        })
    }

    /// Whether `lumincompat` (spec.md §6) hides this service entirely from
    /// a control point asking for that compatibility mode.
    pub fn hidden_for_lumincompat(&self) -> bool {
        self.lumincompat
    }

    pub fn ids(&self) -> String {
        self.ids.join(" ")
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    fn bump_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// `Set(id, username, encrypted-password)`: base64-decode then
    /// OAEP-decrypt the password with the private key, persist, bump the
    /// sequence, emit an event.
    pub async fn set(&self, id: &str, username: &str, encrypted_password: &str) -> Result<()> {
        self.known_id(id)?;
        let ciphertext = STANDARD
            .decode(encrypted_password)
            .map_err(|e| Error::Validation(format!("malformed base64 password for {id}: {e}")))?;
        let plaintext = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|e| Error::Validation(format!("OAEP decryption failed for {id}: {e}")))?;
        let password = String::from_utf8(plaintext).map_err(|e| Error::Validation(format!("decrypted password not UTF-8 for {id}: {e}")))?;

        let record = CredentialRecord {
            username: username.to_string(),
            password,
            encrypted: encrypted_password.to_string(),
            enabled: true,
        };
        self.records.lock().await.insert(id.to_string(), record.clone());
        self.persist(id, &record).await;
        self.bump_sequence();
        self.refresh().await;
        Ok(())
    }

    pub async fn clear(&self, id: &str) -> Result<()> {
        self.known_id(id)?;
        self.records.lock().await.remove(id);
        self.persist(id, &CredentialRecord::default()).await;
        self.bump_sequence();
        self.refresh().await;
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.known_id(id)?;
        let mut records = self.records.lock().await;
        let record = records.entry(id.to_string()).or_default();
        record.enabled = enabled;
        let snapshot = record.clone();
        drop(records);
        self.persist(id, &snapshot).await;
        self.bump_sequence();
        self.refresh().await;
        Ok(())
    }

    /// `Get(id)`: `(username, enabled)`; never returns the plaintext
    /// password back out to a control point.
    pub async fn get(&self, id: &str) -> Result<(String, bool)> {
        self.known_id(id)?;
        let records = self.records.lock().await;
        match records.get(id) {
            Some(r) => Ok((r.username.clone(), r.enabled)),
            None => Ok((String::new(), false)),
        }
    }

    /// `Login(id)`: invoke the per-service helper on demand, request a
    /// token for the stored credentials. An empty token means the
    /// credentials are bad; they're cleared from memory (spec.md §4.12).
    pub async fn login(&self, id: &str) -> Result<String> {
        self.known_id(id)?;
        let (username, password) = {
            let records = self.records.lock().await;
            match records.get(id) {
                Some(r) if r.enabled => (r.username.clone(), r.password.clone()),
                _ => return Err(Error::StateMismatch(format!("no enabled credentials for {id}"))),
            }
        };
        let token = self.run_login_helper(id, &username, &password, None).await?;
        if token.is_empty() {
            warn!(id, "login helper returned an empty token, clearing credentials");
            if let Some(record) = self.records.lock().await.get_mut(id) {
                record.username.clear();
                record.password.clear();
            }
        }
        Ok(token)
    }

    /// `ReLogin(id, current-token)`: same helper contract, passing the
    /// token being renewed.
    pub async fn relogin(&self, id: &str, current_token: &str) -> Result<String> {
        self.known_id(id)?;
        let (username, password) = {
            let records = self.records.lock().await;
            match records.get(id) {
                Some(r) if r.enabled => (r.username.clone(), r.password.clone()),
                _ => return Err(Error::StateMismatch(format!("no enabled credentials for {id}"))),
            }
        };
        let token = self.run_login_helper(id, &username, &password, Some(current_token)).await?;
        if token.is_empty() {
            if let Some(record) = self.records.lock().await.get_mut(id) {
                record.username.clear();
                record.password.clear();
            }
        }
        Ok(token)
    }

    /// Writes `id\nusername\npassword\n[current-token]\n` to the helper's
    /// stdin rather than argv, so a secret never shows up in a process
    /// listing; the helper's single stdout line is the token.
    async fn run_login_helper(&self, id: &str, username: &str, password: &str, current_token: Option<&str>) -> Result<String> {
        let helper = self
            .login_helper
            .clone()
            .ok_or_else(|| Error::HelperFailure("no credentials login helper configured".to_string()))?;

        let mut child = Command::new(&helper)
            .arg(id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::HelperFailure(format!("failed to spawn login helper `{helper}`: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut payload = format!("{username}\n{password}\n");
            if let Some(token) = current_token {
                payload.push_str(token);
                payload.push('\n');
            }
            let _ = stdin.write_all(payload.as_bytes()).await;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::HelperFailure(format!("login helper `{helper}` failed: {e}")))?;
        if !output.status.success() {
            return Err(Error::HelperFailure(format!("login helper `{helper}` exited with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn make_state(&self) -> StateMap {
        vec![("SequenceNumber".to_string(), self.sequence_number().to_string())]
    }

    pub async fn refresh(&self) {
        let state = self.make_state().await;
        self.base.on_event(state).await;
    }

    fn known_id(&self, id: &str) -> Result<()> {
        if self.ids.iter().any(|known| known == id) {
            Ok(())
        } else {
            Err(Error::Validation(format!("unknown credentials id {id:?}")))
        }
    }

    async fn persist(&self, id: &str, record: &CredentialRecord) {
        match &self.backing {
            Backing::File(path) => {
                if let Err(e) = persist_to_file(path, id, record) {
                    warn!(id, error = %e, "failed to persist credentials to file");
                }
            }
            Backing::Memory(store) => {
                let mut store = store.lock().await;
                write_record(&mut store, id, record);
            }
        }
    }
}

/// Keys `<svc>user`, `<svc>pass`, `<svc>epass` in the section named after
/// the service id (spec.md §4.12 persistence format).
fn write_record(store: &mut ConfSimple, id: &str, record: &CredentialRecord) {
    if record.username.is_empty() && record.password.is_empty() {
        let _ = store.erase_key(id);
        return;
    }
    let _ = store.set("user", &record.username, id);
    let _ = store.set("pass", &record.password, id);
    let _ = store.set("epass", &record.encrypted, id);
    let _ = store.set("enabled", if record.enabled { "1" } else { "0" }, id);
}

fn persist_to_file(path: &std::path::Path, id: &str, record: &CredentialRecord) -> Result<()> {
    let mut store = ConfSimple::from_file(path, Flags::NONE);
    write_record(&mut store, id, record);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mut perms = meta.permissions();
            perms.set_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
    Ok(())
}

/// Loads persisted records at startup. The memory backing never survives a
/// restart (it stands in for shared memory, which doesn't either), so it
/// always starts empty; only the file backing has anything to read.
async fn load_records(backing: &Backing, ids: &[String]) -> std::collections::HashMap<String, CredentialRecord> {
    let Backing::File(path) = backing else {
        return std::collections::HashMap::new();
    };
    // `Flags::NONE` rather than `read_only()`: a first-run missing file is
    // meant to start empty, not log as a read error (see `ConfSimple::from_file`).
    let store = ConfSimple::from_file(path, Flags::NONE);
    let mut out = std::collections::HashMap::new();
    for id in ids {
        let username = store.get("user", id).unwrap_or_default();
        if username.is_empty() {
            continue;
        }
        out.insert(
            id.clone(),
            CredentialRecord {
                username,
                password: store.get("pass", id).unwrap_or_default(),
                encrypted: store.get("epass", id).unwrap_or_default(),
                enabled: store.get_bool("enabled", id, true),
            },
        );
    }
    out
}

fn load_or_generate_key(path: &std::path::Path) -> Result<RsaPrivateKey> {
    if let Ok(pem) = std::fs::read_to_string(path) {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(&pem) {
            return Ok(key);
        }
        warn!(path = %path.display(), "existing credentials key unreadable, regenerating");
    }
    let mut rng = rand_core::OsRng;
    let key = RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(|e| Error::HelperFailure(format!("failed to generate RSA keypair: {e}")))?;
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::HelperFailure(format!("failed to encode generated keypair: {e}")))?;
    std::fs::write(path, pem.as_bytes()).map_err(|e| Error::HelperFailure(format!("failed to write {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mut perms = meta.permissions();
            perms.set_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventsink::MemoryEventSink;
    use upmpmeta::MetaCache;
    use upmpmpd::fake::FakeMpd;

    fn encrypt_for(public_pem: &str, plaintext: &str) -> String {
        let key = RsaPublicKey::from_public_key_pem(public_pem).unwrap();
        let mut rng = rand_core::OsRng;
        let ciphertext = key.encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext.as_bytes()).unwrap();
        STANDARD.encode(ciphertext)
    }

    async fn setup(save_to_file: bool) -> Arc<CredentialsService> {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaCache::load(dir.path().join("meta"), std::time::Duration::from_millis(1)).await.unwrap());
        let ctx = AppContext::new(Arc::new(FakeMpd::new()), meta, dir.path().to_path_buf(), true);
        let sink = Arc::new(MemoryEventSink::new());
        let ids: Vec<String> = DEFAULT_IDS.split_whitespace().map(str::to_string).collect();
        Arc::new(
            CredentialsService::new(ctx, ids, None, save_to_file, false, sink)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn set_decrypts_with_oaep_and_round_trips_through_get() {
        let svc = setup(true).await;
        let encrypted = encrypt_for(svc.public_key_pem(), "hunter2");
        svc.set("tidalhifi.com", "alice", &encrypted).await.unwrap();
        let (username, enabled) = svc.get("tidalhifi.com").await.unwrap();
        assert_eq!(username, "alice");
        assert!(enabled);
        assert_eq!(svc.sequence_number(), 2);
    }

    #[tokio::test]
    async fn rejects_unknown_service_id() {
        let svc = setup(true).await;
        let encrypted = encrypt_for(svc.public_key_pem(), "whatever");
        assert!(svc.set("not-a-real-service.com", "alice", &encrypted).await.is_err());
    }

    #[tokio::test]
    async fn clear_removes_the_record() {
        let svc = setup(false).await;
        let encrypted = encrypt_for(svc.public_key_pem(), "hunter2");
        svc.set("qobuz.com", "bob", &encrypted).await.unwrap();
        svc.clear("qobuz.com").await.unwrap();
        let (username, enabled) = svc.get("qobuz.com").await.unwrap();
        assert_eq!(username, "");
        assert!(!enabled);
    }

    #[tokio::test]
    async fn login_without_a_configured_helper_fails() {
        let svc = setup(true).await;
        let encrypted = encrypt_for(svc.public_key_pem(), "hunter2");
        svc.set("tidalhifi.com", "alice", &encrypted).await.unwrap();
        assert!(svc.login("tidalhifi.com").await.is_err());
    }

    #[tokio::test]
    async fn persisted_record_reloads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(MetaCache::load(dir.path().join("meta"), std::time::Duration::from_millis(1)).await.unwrap());
        let ctx = AppContext::new(Arc::new(FakeMpd::new()), meta.clone(), dir.path().to_path_buf(), true);
        let ids: Vec<String> = DEFAULT_IDS.split_whitespace().map(str::to_string).collect();
        let sink = Arc::new(MemoryEventSink::new());
        let svc = CredentialsService::new(ctx.clone(), ids.clone(), None, true, false, sink.clone()).await.unwrap();
        let encrypted = encrypt_for(svc.public_key_pem(), "hunter2");
        svc.set("tidalhifi.com", "alice", &encrypted).await.unwrap();

        let reloaded = CredentialsService::new(ctx, ids, None, true, false, sink).await.unwrap();
        let (username, enabled) = reloaded.get("tidalhifi.com").await.unwrap();
        assert_eq!(username, "alice");
        assert!(enabled);
    }
}
