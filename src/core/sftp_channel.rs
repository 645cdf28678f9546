//! Per-session SFTP file channels layered on established SSH sessions.
//!
//! At most one channel per session; the fleet is capped and oldest
//! channels are evicted first. Reads classify text vs binary (binary
//! comes back base64-encoded) and recursive deletes run post-order,
//! aborting on the first error.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine as _;
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::bounded::BoundedMap;
use super::error::{CoreError, CoreResult};
use super::resources::Closeable;
use super::ssh_engine::TrustHandler;
use crate::MAX_SFTP_CLIENTS;

/// Extensions always treated as text.
const TEXT_EXTENSIONS: [&str; 58] = [
    "txt", "md", "markdown", "rst", "json", "yaml", "yml", "toml", "xml", "html", "htm",
    "css", "scss", "less", "js", "mjs", "cjs", "ts", "tsx", "jsx", "go", "py", "rb", "rs",
    "c", "h", "cpp", "hpp", "cc", "java", "kt", "swift", "sh", "bash", "zsh", "fish",
    "ps1", "bat", "cmd", "sql", "ini", "cfg", "conf", "log", "csv", "tsv", "env", "lock",
    "properties", "gradle", "tf", "vue", "svelte", "php", "pl", "lua", "vim", "service",
];

/// Extensionless files always treated as text.
const TEXT_FILENAMES: [&str; 12] = [
    "dockerfile", "makefile", "readme", "license", "changelog", "contributing",
    "authors", "notice", "vagrantfile", "jenkinsfile", "gemfile", "procfile",
];

/// One directory listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
    pub size: u64,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
}

/// A file read result; binary content is base64-encoded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpFileContent {
    pub path: String,
    pub content: String,
    /// `utf8` or `base64`.
    pub encoding: &'static str,
    pub size: u64,
}

/// Joins path segments with `/`, collapsing duplicate slashes.
pub(crate) fn join_remote_path(base: &str, name: &str) -> String {
    let mut joined = if name.starts_with('/') {
        name.to_string()
    } else if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    };
    while joined.contains("//") {
        joined = joined.replace("//", "/");
    }
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

/// Renders a `drwxr-xr-x` style mode string from permission bits.
pub(crate) fn mode_string(permissions: Option<u32>, is_dir: bool, is_symlink: bool) -> String {
    let type_char = if is_symlink {
        'l'
    } else if is_dir {
        'd'
    } else {
        '-'
    };
    let bits = permissions.unwrap_or(0);
    let mut out = String::with_capacity(10);
    out.push(type_char);
    for shift in [6u32, 3, 0] {
        let triplet = (bits >> shift) & 0o7;
        out.push(if triplet & 0o4 != 0 { 'r' } else { '-' });
        out.push(if triplet & 0o2 != 0 { 'w' } else { '-' });
        out.push(if triplet & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// Derives (is_dir, is_symlink) from the SFTP permission bits
/// (`S_IFMT` high bits of the POSIX mode).
pub(crate) fn file_kind(permissions: Option<u32>) -> (bool, bool) {
    const S_IFMT: u32 = 0o170_000;
    const S_IFDIR: u32 = 0o040_000;
    const S_IFLNK: u32 = 0o120_000;
    match permissions.map(|p| p & S_IFMT) {
        Some(S_IFDIR) => (true, false),
        Some(S_IFLNK) => (false, true),
        _ => (false, false),
    }
}

/// Whether a remote file should be read as text based on its name.
pub(crate) fn is_text_by_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    if TEXT_FILENAMES.contains(&lower.as_str()) {
        return true;
    }
    if let Some((stem, ext)) = lower.rsplit_once('.') {
        if TEXT_EXTENSIONS.contains(&ext) {
            return true;
        }
        // Dotfiles with no inner dot (".bashrc") are text; ".env.local"
        // falls through to the content heuristic.
        if stem.is_empty() && !ext.contains('.') {
            return true;
        }
    }
    false
}

/// Content heuristic: no null bytes, and at least 90% of bytes in
/// printable ASCII, tab/CR/LF, or >= 128 (UTF-8 continuation range).
pub(crate) fn is_probably_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return true;
    }
    if bytes.contains(&0) {
        return false;
    }
    let friendly = bytes
        .iter()
        .filter(|&&b| (0x20..=0x7e).contains(&b) || matches!(b, b'\t' | b'\r' | b'\n') || b >= 0x80)
        .count();
    friendly as f64 / bytes.len() as f64 >= 0.9
}

fn sftp_err(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::protocol(format!("sftp {context}: {e}"))
}

/// One live SFTP channel.
pub struct SftpClient {
    sftp: SftpSession,
    /// Server-reported working directory, when the server answers.
    cwd: Option<String>,
}

impl Closeable for Arc<SftpClient> {
    fn close(&self) -> CoreResult<()> {
        // The channel closes when the last reference drops; nothing to
        // flush here.
        log::debug!("sftp client released");
        Ok(())
    }
}

impl SftpClient {
    /// Normalizes a frontend-supplied path: `.`/empty resolve to the
    /// server working directory, relative paths join onto it.
    fn resolve(&self, path: &str) -> String {
        let base = self.cwd.as_deref().unwrap_or("/");
        if path.is_empty() || path == "." {
            return base.to_string();
        }
        join_remote_path(base, path)
    }
}

/// Registry of per-session SFTP channels, capped fleet-wide.
pub struct SftpManager {
    clients: BoundedMap<String, Arc<SftpClient>>,
}

impl Default for SftpManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SftpManager {
    pub fn new() -> Self {
        Self {
            clients: BoundedMap::new(MAX_SFTP_CLIENTS),
        }
    }

    pub fn is_open(&self, session_id: &str) -> bool {
        self.clients.contains_key(&session_id.to_string())
    }

    pub fn active_count(&self) -> usize {
        self.clients.len()
    }

    /// Opens the session's file channel, replacing any existing one.
    pub async fn open(
        &self,
        session_id: &str,
        handle: Arc<Handle<TrustHandler>>,
    ) -> CoreResult<()> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| sftp_err("channel open", e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| sftp_err("subsystem request", e))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| sftp_err("handshake", e))?;
        let cwd = sftp.canonicalize(".").await.ok();
        self.clients.insert(
            session_id.to_string(),
            Arc::new(SftpClient { sftp, cwd }),
        );
        log::info!("sftp {session_id}: channel open (cwd {:?})", self.cwd_of(session_id));
        Ok(())
    }

    fn cwd_of(&self, session_id: &str) -> Option<String> {
        self.clients
            .with(&session_id.to_string(), |c| c.cwd.clone())
            .flatten()
    }

    fn client(&self, session_id: &str) -> CoreResult<Arc<SftpClient>> {
        self.clients
            .with(&session_id.to_string(), |c| c.clone())
            .ok_or_else(|| CoreError::not_found("sftp channel", session_id))
    }

    /// Closes the session's channel, if any. Idempotent.
    pub async fn close(&self, session_id: &str) {
        if let Some(client) = self.clients.remove(&session_id.to_string()) {
            if let Err(e) = client.sftp.close().await {
                log::debug!("sftp {session_id}: close returned {e}");
            }
            log::info!("sftp {session_id}: channel closed");
        }
    }

    pub async fn close_all(&self) {
        for id in self.clients.keys() {
            self.close(&id).await;
        }
    }

    /// Lists a remote directory.
    pub async fn list(&self, session_id: &str, path: &str) -> CoreResult<Vec<SftpEntry>> {
        let client = self.client(session_id)?;
        let dir_path = client.resolve(path);
        let read_dir = client
            .sftp
            .read_dir(&dir_path)
            .await
            .map_err(|e| sftp_err("read dir", e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let full_path = join_remote_path(&dir_path, &name);
            let attrs = entry.metadata();
            let (is_dir, is_symlink) = file_kind(attrs.permissions);
            let symlink_target = if is_symlink {
                client.sftp.read_link(&full_path).await.ok()
            } else {
                None
            };
            entries.push(SftpEntry {
                mode: mode_string(attrs.permissions, is_dir, is_symlink),
                name,
                path: full_path,
                is_dir,
                is_symlink,
                symlink_target,
                size: attrs.size.unwrap_or(0),
                mtime: attrs.mtime.map(|t| t as i64),
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then(a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Reads a remote file, classifying text vs binary. Binary content
    /// is returned base64-encoded.
    pub async fn read_file(&self, session_id: &str, path: &str) -> CoreResult<SftpFileContent> {
        let client = self.client(session_id)?;
        let full_path = client.resolve(path);
        let mut file = client
            .sftp
            .open(&full_path)
            .await
            .map_err(|e| sftp_err("open", e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| CoreError::io("sftp read", e))?;

        let name = full_path.rsplit('/').next().unwrap_or(&full_path);
        let size = bytes.len() as u64;
        let treat_as_text = is_text_by_name(name)
            || (std::str::from_utf8(&bytes).is_ok() && is_probably_text(&bytes));
        if treat_as_text {
            match String::from_utf8(bytes) {
                Ok(content) => {
                    return Ok(SftpFileContent {
                        path: full_path,
                        content,
                        encoding: "utf8",
                        size,
                    })
                }
                Err(e) => {
                    // Allow-listed name but non-UTF-8 payload.
                    let bytes = e.into_bytes();
                    return Ok(SftpFileContent {
                        path: full_path,
                        content: base64::engine::general_purpose::STANDARD.encode(&bytes),
                        encoding: "base64",
                        size,
                    });
                }
            }
        }
        Ok(SftpFileContent {
            path: full_path,
            content: base64::engine::general_purpose::STANDARD.encode(&bytes),
            encoding: "base64",
            size,
        })
    }

    /// Writes (creates or truncates) a remote file.
    pub async fn write_file(&self, session_id: &str, path: &str, data: &[u8]) -> CoreResult<()> {
        let client = self.client(session_id)?;
        let full_path = client.resolve(path);
        let mut file = client
            .sftp
            .create(&full_path)
            .await
            .map_err(|e| sftp_err("create", e))?;
        file.write_all(data)
            .await
            .map_err(|e| CoreError::io("sftp write", e))?;
        file.shutdown()
            .await
            .map_err(|e| CoreError::io("sftp flush", e))?;
        Ok(())
    }

    pub async fn create_dir(&self, session_id: &str, path: &str) -> CoreResult<()> {
        let client = self.client(session_id)?;
        let full_path = client.resolve(path);
        client
            .sftp
            .create_dir(&full_path)
            .await
            .map_err(|e| sftp_err("mkdir", e))
    }

    pub async fn rename(&self, session_id: &str, from: &str, to: &str) -> CoreResult<()> {
        let client = self.client(session_id)?;
        let from = client.resolve(from);
        let to = client.resolve(to);
        client
            .sftp
            .rename(&from, &to)
            .await
            .map_err(|e| sftp_err("rename", e))
    }

    /// Stats a remote path (lstat semantics for symlinks).
    pub async fn stat(&self, session_id: &str, path: &str) -> CoreResult<SftpEntry> {
        let client = self.client(session_id)?;
        let full_path = client.resolve(path);
        let attrs = client
            .sftp
            .symlink_metadata(&full_path)
            .await
            .map_err(|e| sftp_err("stat", e))?;
        let (is_dir, is_symlink) = file_kind(attrs.permissions);
        let symlink_target = if is_symlink {
            client.sftp.read_link(&full_path).await.ok()
        } else {
            None
        };
        Ok(SftpEntry {
            name: full_path
                .rsplit('/')
                .next()
                .unwrap_or(&full_path)
                .to_string(),
            mode: mode_string(attrs.permissions, is_dir, is_symlink),
            path: full_path,
            is_dir,
            is_symlink,
            symlink_target,
            size: attrs.size.unwrap_or(0),
            mtime: attrs.mtime.map(|t| t as i64),
        })
    }

    /// Deletes a file or directory. `recursive: None` auto-detects;
    /// explicit `Some(false)` on a non-empty directory surfaces the
    /// server error.
    pub async fn delete(
        &self,
        session_id: &str,
        path: &str,
        recursive: Option<bool>,
    ) -> CoreResult<()> {
        let client = self.client(session_id)?;
        let full_path = client.resolve(path);
        let attrs = client
            .sftp
            .symlink_metadata(&full_path)
            .await
            .map_err(|e| sftp_err("stat", e))?;
        let (is_dir, _) = file_kind(attrs.permissions);
        if is_dir {
            if recursive.unwrap_or(true) {
                delete_tree(&client.sftp, full_path).await
            } else {
                client
                    .sftp
                    .remove_dir(&full_path)
                    .await
                    .map_err(|e| sftp_err("rmdir", e))
            }
        } else {
            client
                .sftp
                .remove_file(&full_path)
                .await
                .map_err(|e| sftp_err("remove", e))
        }
    }
}

/// Post-order directory removal. Symlinks are removed as entries, never
/// descended into, so link cycles cannot recurse. The first error aborts
/// the whole operation.
fn delete_tree(
    sftp: &SftpSession,
    path: String,
) -> Pin<Box<dyn Future<Output = CoreResult<()>> + Send + '_>> {
    Box::pin(async move {
        let read_dir = sftp
            .read_dir(&path)
            .await
            .map_err(|e| sftp_err("read dir", e))?;
        for entry in read_dir {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let child = join_remote_path(&path, &name);
            let (is_dir, _) = file_kind(entry.metadata().permissions);
            if is_dir {
                delete_tree(sftp, child).await?;
            } else {
                sftp.remove_file(&child)
                    .await
                    .map_err(|e| sftp_err("remove", e))?;
            }
        }
        sftp.remove_dir(&path)
            .await
            .map_err(|e| sftp_err("rmdir", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_path_join_collapses_slashes() {
        assert_eq!(join_remote_path("/home/u", "docs"), "/home/u/docs");
        assert_eq!(join_remote_path("/home/u/", "/etc/hosts"), "/etc/hosts");
        assert_eq!(join_remote_path("/", "tmp//x"), "/tmp/x");
        assert_eq!(join_remote_path("", "relative"), "relative");
    }

    #[test]
    fn mode_string_renders_type_and_triplets() {
        assert_eq!(mode_string(Some(0o755), true, false), "drwxr-xr-x");
        assert_eq!(mode_string(Some(0o644), false, false), "-rw-r--r--");
        assert_eq!(mode_string(Some(0o777), false, true), "lrwxrwxrwx");
        assert_eq!(mode_string(None, false, false), "----------");
    }

    #[test]
    fn name_allow_lists_force_text() {
        assert!(is_text_by_name("notes.txt"));
        assert!(is_text_by_name("config.YAML"));
        assert!(is_text_by_name("Dockerfile"));
        assert!(is_text_by_name("README"));
        assert!(is_text_by_name(".bashrc"));
        assert!(!is_text_by_name(".env.local"));
        assert!(!is_text_by_name("photo.png"));
        assert!(!is_text_by_name("binary"));
    }

    #[test]
    fn content_heuristic() {
        assert!(is_probably_text(b"plain ascii with\nnewlines\t"));
        assert!(is_probably_text("snowman \u{2603} utf8".as_bytes()));
        assert!(!is_probably_text(b"has\x00null"));
        // Mostly control characters: rejected.
        let noisy: Vec<u8> = (1u8..31).cycle().take(100).collect();
        assert!(!is_probably_text(&noisy));
        assert!(is_probably_text(b""));
    }
}
