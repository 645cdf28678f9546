//! Host-key trust pipeline over `~/.ssh/known_hosts`.
//!
//! Unknown hosts are learned by appending; changed keys park a pending
//! update awaiting the user's decision and fail the dial. The rewrite on
//! approval streams lines, drops every entry for the target host, and
//! appends the new key. All file access is serialized through a single
//! writer lock.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use russh::keys::{HashAlg, PublicKey};

use super::error::{CoreError, CoreResult};
use super::events::{Event, EventBus};

/// Transient record awaiting the user's accept/reject of a changed key.
#[derive(Debug, Clone)]
pub struct PendingHostKeyUpdate {
    pub session_id: String,
    pub hostname: String,
    pub port: u16,
    pub old_fingerprint: String,
    pub new_fingerprint: String,
    new_entry: String,
}

pub struct HostKeyStore {
    path: PathBuf,
    pending: DashMap<String, PendingHostKeyUpdate>,
    write_lock: Mutex<()>,
    bus: EventBus,
}

/// `SHA256:...` fingerprint of a public key.
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

/// The host field written for an entry: plain hostname for port 22,
/// `[host]:port` otherwise.
fn host_field(hostname: &str, port: u16) -> String {
    if port == 22 {
        hostname.to_string()
    } else {
        format!("[{hostname}]:{port}")
    }
}

/// Whether a known_hosts host field (possibly comma-separated) names the
/// target. Hashed entries (`|1|...`) never match here; they are left
/// untouched by rewrites.
fn host_field_matches(field: &str, hostname: &str, port: u16) -> bool {
    let bracketed = format!("[{hostname}]:{port}");
    field
        .split(',')
        .any(|h| h == hostname || h == bracketed)
}

/// A parsed known_hosts line: host field plus the public key.
fn parse_line(line: &str) -> Option<(&str, PublicKey)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let mut fields = trimmed.split_whitespace();
    let hosts = fields.next()?;
    let key_type = fields.next()?;
    let key_b64 = fields.next()?;
    let key = PublicKey::from_openssh(&format!("{key_type} {key_b64}")).ok()?;
    Some((hosts, key))
}

fn format_entry(hostname: &str, port: u16, key: &PublicKey) -> CoreResult<String> {
    let openssh = key
        .to_openssh()
        .map_err(|e| CoreError::protocol(format!("cannot encode host key: {e}")))?;
    Ok(format!("{} {}", host_field(hostname, port), openssh.trim()))
}

impl HostKeyStore {
    pub fn new(path: PathBuf, bus: EventBus) -> Self {
        Self {
            path,
            pending: DashMap::new(),
            write_lock: Mutex::new(()),
            bus,
        }
    }

    /// `~/.ssh/known_hosts`.
    pub fn default_path() -> CoreResult<PathBuf> {
        let base = directories::BaseDirs::new()
            .ok_or_else(|| CoreError::state("cannot resolve home directory"))?;
        Ok(base.home_dir().join(".ssh").join("known_hosts"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_pending(&self, session_id: &str) -> bool {
        self.pending.contains_key(session_id)
    }

    /// Verifies a presented key against the known-hosts file.
    ///
    /// Missing file: create `.ssh` (0700), learn the key, accept.
    /// Known + matching: accept. Unknown host: learn, accept.
    /// Changed key: park a pending update, emit `host-key-prompt` with
    /// both fingerprints plus a terminal warning, and fail the dial.
    pub fn verify(
        &self,
        session_id: &str,
        hostname: &str,
        port: u16,
        key: &PublicKey,
    ) -> CoreResult<bool> {
        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };

        if !self.path.exists() {
            self.append_entry(hostname, port, key)?;
            log::info!("known_hosts: created and learned {hostname}");
            return Ok(true);
        }

        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| CoreError::io(format!("read {}", self.path.display()), e))?;

        let mut old_key = None;
        for line in raw.lines() {
            let Some((hosts, parsed)) = parse_line(line) else {
                continue;
            };
            if !host_field_matches(hosts, hostname, port) {
                continue;
            }
            if parsed.key_data() == key.key_data() {
                return Ok(true);
            }
            old_key = Some(parsed);
        }

        let Some(old_key) = old_key else {
            // First contact with this host.
            self.append_entry(hostname, port, key)?;
            log::info!("known_hosts: learned new host {hostname}");
            return Ok(true);
        };

        let old_fingerprint = fingerprint(&old_key);
        let new_fingerprint = fingerprint(key);
        log::warn!(
            "known_hosts: key for {hostname} changed ({old_fingerprint} -> {new_fingerprint})"
        );
        self.pending.insert(
            session_id.to_string(),
            PendingHostKeyUpdate {
                session_id: session_id.to_string(),
                hostname: hostname.to_string(),
                port,
                old_fingerprint: old_fingerprint.clone(),
                new_fingerprint: new_fingerprint.clone(),
                new_entry: format_entry(hostname, port, key)?,
            },
        );
        self.bus.emit(Event::HostKeyPrompt {
            session_id: session_id.to_string(),
            host: hostname.to_string(),
            old_fingerprint,
            new_fingerprint,
        });
        self.bus.emit(Event::TerminalOutput {
            session_id: session_id.to_string(),
            data: format!(
                "\r\n\x1b[31m@@@ WARNING: the host key for {hostname} has changed. \
                 Connection blocked until you approve or reject the new key.\x1b[0m\r\n"
            )
            .into_bytes(),
        });
        Err(CoreError::trust(format!(
            "host key for {hostname} changed; pending user approval"
        )))
    }

    /// Resolves a pending update. Reject drops the record; accept
    /// rewrites the file, replacing every entry for the host with the
    /// new key. The user retries the connection manually afterwards.
    pub fn approve_update(&self, session_id: &str, approved: bool) -> CoreResult<()> {
        let (_, pending) = self
            .pending
            .remove(session_id)
            .ok_or_else(|| CoreError::not_found("pending host-key update", session_id))?;
        if !approved {
            log::info!(
                "known_hosts: rejected key change for {}",
                pending.hostname
            );
            return Ok(());
        }

        let _guard = match self.write_lock.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| CoreError::io(format!("read {}", self.path.display()), e))?;
        let mut kept: Vec<&str> = Vec::new();
        for line in raw.lines() {
            let drop_line = parse_line(line)
                .map(|(hosts, _)| host_field_matches(hosts, &pending.hostname, pending.port))
                .unwrap_or(false);
            if !drop_line {
                kept.push(line);
            }
        }
        let mut output = kept.join("\n");
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&pending.new_entry);
        output.push('\n');
        self.write_file(&output)?;
        log::info!("known_hosts: accepted new key for {}", pending.hostname);
        Ok(())
    }

    fn append_entry(&self, hostname: &str, port: u16, key: &PublicKey) -> CoreResult<()> {
        self.ensure_parent_dir()?;
        let entry = format_entry(hostname, port, key)?;
        let mut contents = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(CoreError::io(format!("read {}", self.path.display()), e)),
        };
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&entry);
        contents.push('\n');
        self.write_file(&contents)
    }

    fn ensure_parent_dir(&self) -> CoreResult<()> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)
            .map_err(|e| CoreError::io(format!("create {}", dir.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }
        Ok(())
    }

    fn write_file(&self, contents: &str) -> CoreResult<()> {
        self.ensure_parent_dir()?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents.as_bytes())
            .map_err(|e| CoreError::io(format!("write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| CoreError::io(format!("rename into {}", self.path.display()), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use tempfile::tempdir;

    /// Builds a syntactically valid ed25519 public key from fixed bytes.
    fn test_key(fill: u8) -> PublicKey {
        let mut blob = Vec::new();
        let name = b"ssh-ed25519";
        blob.extend_from_slice(&(name.len() as u32).to_be_bytes());
        blob.extend_from_slice(name);
        blob.extend_from_slice(&32u32.to_be_bytes());
        blob.extend_from_slice(&[fill; 32]);
        let b64 = base64::engine::general_purpose::STANDARD.encode(&blob);
        PublicKey::from_openssh(&format!("ssh-ed25519 {b64} test@thermic")).unwrap()
    }

    fn store(dir: &Path) -> (HostKeyStore, EventBus) {
        let bus = EventBus::default();
        (
            HostKeyStore::new(dir.join(".ssh/known_hosts"), bus.clone()),
            bus,
        )
    }

    #[test]
    fn missing_file_is_created_and_key_learned() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        let key = test_key(1);
        assert!(store.verify("s-1", "example.com", 22, &key).unwrap());
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("example.com ssh-ed25519 "));
        // Re-verification matches the stored entry.
        assert!(store.verify("s-1", "example.com", 22, &key).unwrap());
    }

    #[test]
    fn unknown_host_is_appended_not_rewritten() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        store.verify("s-1", "alpha", 22, &test_key(1)).unwrap();
        store.verify("s-1", "beta", 22, &test_key(2)).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("alpha"));
        assert!(raw.contains("beta"));
    }

    #[test]
    fn changed_key_parks_pending_and_fails() {
        let dir = tempdir().unwrap();
        let (store, bus) = store(dir.path());
        let mut rx = bus.subscribe();
        let k1 = test_key(1);
        let k2 = test_key(2);

        store.verify("s-1", "example.com", 22, &k1).unwrap();
        let err = store.verify("s-1", "example.com", 22, &k2).unwrap_err();
        assert!(matches!(err, CoreError::Trust(_)));
        assert!(store.has_pending("s-1"));

        // The original key is never silently overwritten.
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert!(store.verify("s-2", "example.com", 22, &k1).is_ok());

        let mut saw_prompt = false;
        while let Ok(event) = rx.try_recv() {
            if let Event::HostKeyPrompt {
                old_fingerprint,
                new_fingerprint,
                ..
            } = event
            {
                assert!(old_fingerprint.starts_with("SHA256:"));
                assert!(new_fingerprint.starts_with("SHA256:"));
                assert_ne!(old_fingerprint, new_fingerprint);
                saw_prompt = true;
            }
        }
        assert!(saw_prompt);
    }

    #[test]
    fn approval_rewrites_the_entry() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        let k1 = test_key(1);
        let k2 = test_key(2);
        store.verify("s-1", "example.com", 22, &k1).unwrap();
        store.verify("s-1", "other-host", 22, &test_key(3)).unwrap();
        let _ = store.verify("s-1", "example.com", 22, &k2);

        store.approve_update("s-1", true).unwrap();
        assert!(!store.has_pending("s-1"));

        // Old line dropped, new appended, unrelated host untouched.
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("other-host"));
        assert!(store.verify("s-9", "example.com", 22, &k2).unwrap());
    }

    #[test]
    fn rejection_just_drops_the_record() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        let k1 = test_key(1);
        store.verify("s-1", "example.com", 22, &k1).unwrap();
        let _ = store.verify("s-1", "example.com", 22, &test_key(2));
        store.approve_update("s-1", false).unwrap();
        assert!(!store.has_pending("s-1"));
        // File still holds the original key.
        assert!(store.verify("s-3", "example.com", 22, &k1).unwrap());
    }

    #[test]
    fn approve_without_pending_is_not_found() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        assert!(matches!(
            store.approve_update("ghost", true).unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[test]
    fn non_default_port_uses_bracketed_form() {
        let dir = tempdir().unwrap();
        let (store, _) = store(dir.path());
        let key = test_key(1);
        store.verify("s-1", "example.com", 2222, &key).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("[example.com]:2222 "));
        assert!(store.verify("s-1", "example.com", 2222, &key).unwrap());
        // Port 22 lookups do not match the bracketed entry.
        assert!(store.verify("s-1", "example.com", 22, &key).unwrap());
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap().lines().count(),
            2
        );
    }
}
