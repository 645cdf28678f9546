//! Remote file operations over the session's SFTP channel.
//!
//! The channel is opened lazily on first use; `delete` auto-detects
//! directories unless the caller pins the recursive mode.

use base64::Engine as _;

use crate::core::error::{CoreError, CoreResult};
use crate::core::sftp_channel::{SftpEntry, SftpFileContent};
use crate::App;

/// Lists a remote directory. `path` may be empty or `.` for the
/// server-reported working directory.
pub async fn sftp_list(app: &App, session_id: &str, path: &str) -> CoreResult<Vec<SftpEntry>> {
    app.tabs.ensure_sftp(session_id).await?;
    app.sftp.list(session_id, path).await
}

/// Reads a remote file; binary payloads come back base64-encoded.
pub async fn sftp_read_file(
    app: &App,
    session_id: &str,
    path: &str,
) -> CoreResult<SftpFileContent> {
    app.tabs.ensure_sftp(session_id).await?;
    app.sftp.read_file(session_id, path).await
}

/// Writes a remote file. `encoding` is `utf8` (default) or `base64`.
pub async fn sftp_write_file(
    app: &App,
    session_id: &str,
    path: &str,
    content: &str,
    encoding: Option<&str>,
) -> CoreResult<()> {
    let bytes = match encoding.unwrap_or("utf8") {
        "utf8" => content.as_bytes().to_vec(),
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| CoreError::validation(format!("invalid base64 payload: {e}")))?,
        other => {
            return Err(CoreError::validation(format!(
                "unknown encoding {other:?}, expected utf8 or base64"
            )))
        }
    };
    app.tabs.ensure_sftp(session_id).await?;
    app.sftp.write_file(session_id, path, &bytes).await
}

pub async fn sftp_create_directory(app: &App, session_id: &str, path: &str) -> CoreResult<()> {
    app.tabs.ensure_sftp(session_id).await?;
    app.sftp.create_dir(session_id, path).await
}

/// Deletes a remote file or directory. `recursive: None` auto-detects.
pub async fn sftp_delete(
    app: &App,
    session_id: &str,
    path: &str,
    recursive: Option<bool>,
) -> CoreResult<()> {
    app.tabs.ensure_sftp(session_id).await?;
    app.sftp.delete(session_id, path, recursive).await
}

pub async fn sftp_rename(app: &App, session_id: &str, from: &str, to: &str) -> CoreResult<()> {
    app.tabs.ensure_sftp(session_id).await?;
    app.sftp.rename(session_id, from, to).await
}

pub async fn sftp_stat(app: &App, session_id: &str, path: &str) -> CoreResult<SftpEntry> {
    app.tabs.ensure_sftp(session_id).await?;
    app.sftp.stat(session_id, path).await
}
