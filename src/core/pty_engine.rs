//! Local PTY sessions: spawn a shell under a pseudo-terminal, stream
//! its bytes to the event bus, resize, and reap.
//!
//! Two workers per session: a dedicated OS thread reads the PTY master
//! into a bounded channel drained by a tokio task that emits
//! `terminal-output`, and a waiter thread blocks on process exit. Output
//! is forwarded as raw bytes; the engine never transcodes.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio_util::sync::CancellationToken;

use super::error::{CoreError, CoreResult};
use super::events::{Event, EventBus};
use super::shell_probe::parse_wsl_shell;
use crate::{CLOSE_WAIT_TIMEOUT, MAX_SESSIONS, PTY_MAX_READ_ERRORS, PTY_READ_BUF};

/// Fallback terminal size when the requested dimensions are unusable.
const FALLBACK_COLS: u16 = 120;
const FALLBACK_ROWS: u16 = 30;

/// Largest dimension accepted from the frontend.
const MAX_DIMENSION: u16 = 500;

pub(crate) fn clamp_dimensions(cols: u16, rows: u16) -> (u16, u16) {
    if cols == 0 || rows == 0 || cols > MAX_DIMENSION || rows > MAX_DIMENSION {
        (FALLBACK_COLS, FALLBACK_ROWS)
    } else {
        (cols, rows)
    }
}

struct PtySession {
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    closing: Arc<AtomicBool>,
    cancel: CancellationToken,
    /// Signaled by the waiter thread once the child is reaped.
    reaped: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

/// Owns every local PTY session. Cheap to clone into shared state.
#[derive(Clone)]
pub struct PtyEngine {
    sessions: Arc<DashMap<String, PtySession>>,
    bus: EventBus,
}

impl PtyEngine {
    pub fn new(bus: EventBus) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            bus,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Spawns `shell` under a fresh PTY and wires its I/O to the bus.
    ///
    /// Enforces the global session cap, tears down any prior session
    /// with the same id, and resolves `wsl::<distro>` shells through the
    /// WSL launcher. Shell-not-found is a typed failure before spawn.
    pub async fn start(
        &self,
        shell: &str,
        session_id: &str,
        cols: u16,
        rows: u16,
        cwd: Option<String>,
        env: Option<HashMap<String, String>>,
    ) -> CoreResult<()> {
        if self.sessions.len() >= MAX_SESSIONS && !self.sessions.contains_key(session_id) {
            return Err(CoreError::capacity(format!(
                "session cap reached ({MAX_SESSIONS})"
            )));
        }
        if self.sessions.contains_key(session_id) {
            log::info!("pty {session_id}: replacing existing session");
            let _ = self.close(session_id).await;
        }

        let mut cmd = match parse_wsl_shell(shell) {
            Some(distro) => {
                let distro = distro?;
                let mut cmd = CommandBuilder::new("wsl.exe");
                cmd.arg("-d");
                cmd.arg(&distro);
                cmd
            }
            None => {
                let resolved = which::which(shell)
                    .map_err(|_| CoreError::not_found("shell", shell))?;
                CommandBuilder::new(resolved)
            }
        };

        let cwd = cwd
            .filter(|dir| !dir.is_empty())
            .or_else(|| std::env::current_dir().ok().map(|p| p.display().to_string()));
        if let Some(dir) = &cwd {
            cmd.cwd(dir);
        }
        if let Some(envs) = env {
            for (key, value) in envs {
                cmd.env(&key, &value);
            }
        }

        let (cols, rows) = clamp_dimensions(cols, rows);
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CoreError::io("open pty", std::io::Error::other(e.to_string())))?;

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CoreError::io("spawn shell", std::io::Error::other(e.to_string())))?;
        let killer = child.clone_killer();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CoreError::io("take pty writer", std::io::Error::other(e.to_string())))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CoreError::io("clone pty reader", std::io::Error::other(e.to_string())))?;

        let cancel = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));

        // Reader thread: PTY master -> bounded channel. Exits on EOF,
        // cancellation (fd close), or too many consecutive errors.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<u8>>(256);
        let reader_id = session_id.to_string();
        std::thread::Builder::new()
            .name(format!("pty-reader-{session_id}"))
            .spawn(move || {
                let mut buf = [0u8; PTY_READ_BUF];
                let mut consecutive_errors = 0u32;
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            consecutive_errors = 0;
                            if tx.blocking_send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            #[cfg(unix)]
                            {
                                let raw = e.raw_os_error().unwrap_or(0);
                                if raw == libc::EAGAIN || raw == libc::EINTR {
                                    continue;
                                }
                            }
                            consecutive_errors += 1;
                            if consecutive_errors >= PTY_MAX_READ_ERRORS {
                                log::warn!("pty reader {reader_id}: giving up after {consecutive_errors} errors: {e}");
                                break;
                            }
                        }
                    }
                }
                log::debug!("pty reader {reader_id} exited");
            })
            .map_err(|e| CoreError::io("spawn reader thread", e))?;

        // Emitter task: channel -> terminal-output events, in read order.
        let bus = self.bus.clone();
        let emit_id = session_id.to_string();
        let emit_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = rx.recv() => match data {
                        Some(bytes) => bus.emit(Event::TerminalOutput {
                            session_id: emit_id.clone(),
                            data: bytes,
                        }),
                        None => break,
                    },
                    _ = emit_cancel.cancelled() => break,
                }
            }
            log::debug!("pty emitter {emit_id} exited");
        });

        // Waiter thread: reap the child and announce completion.
        let (reaped_tx, reaped_rx) = std::sync::mpsc::channel::<()>();
        let wait_bus = self.bus.clone();
        let wait_id = session_id.to_string();
        std::thread::Builder::new()
            .name(format!("pty-waiter-{session_id}"))
            .spawn(move || {
                match child.wait() {
                    Ok(status) => log::info!("pty {wait_id}: shell exited with {status}"),
                    Err(e) => log::warn!("pty {wait_id}: wait failed: {e}"),
                }
                wait_bus.emit(Event::TerminalOutput {
                    session_id: wait_id,
                    data: b"\r\n[Process completed]\r\n".to_vec(),
                });
                let _ = reaped_tx.send(());
            })
            .map_err(|e| CoreError::io("spawn waiter thread", e))?;

        drop(pair.slave);

        self.sessions.insert(
            session_id.to_string(),
            PtySession {
                writer: Mutex::new(writer),
                master: Mutex::new(pair.master),
                killer: Mutex::new(killer),
                closing,
                cancel,
                reaped: Mutex::new(Some(reaped_rx)),
            },
        );
        log::info!("pty {session_id}: started {shell} at {cols}x{rows}");
        Ok(())
    }

    /// Forwards raw bytes to the PTY master. Fails once the session is
    /// closing.
    pub fn write(&self, session_id: &str, data: &[u8]) -> CoreResult<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CoreError::not_found("session", session_id))?;
        if session.closing.load(Ordering::Acquire) {
            return Err(CoreError::state(format!(
                "session {session_id} is closing"
            )));
        }
        let mut writer = session
            .writer
            .lock()
            .map_err(|e| CoreError::state(format!("writer lock poisoned: {e}")))?;
        writer
            .write_all(data)
            .map_err(|e| CoreError::io("pty write", e))?;
        writer.flush().map_err(|e| CoreError::io("pty flush", e))?;
        Ok(())
    }

    /// Updates the PTY window size (SIGWINCH to the child).
    pub fn resize(&self, session_id: &str, cols: u16, rows: u16) -> CoreResult<()> {
        let (cols, rows) = clamp_dimensions(cols, rows);
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CoreError::not_found("session", session_id))?;
        let master = session
            .master
            .lock()
            .map_err(|e| CoreError::state(format!("master lock poisoned: {e}")))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CoreError::io("pty resize", std::io::Error::other(e.to_string())))?;
        Ok(())
    }

    /// Tears a session down: marks it closing, closes the PTY (SIGHUP to
    /// the child), waits up to 5 s for the reaper, force-kills on
    /// timeout. Closing an unknown or already-closed session is a no-op.
    pub async fn close(&self, session_id: &str) -> CoreResult<()> {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return Ok(());
        };
        session.closing.store(true, Ordering::Release);
        session.cancel.cancel();

        // Dropping the master/writer closes the PTY fd: the child gets
        // SIGHUP and the reader thread sees EOF.
        drop(session.writer);
        drop(session.master);

        let reaped = match session.reaped.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => e.into_inner().take(),
        };
        let timed_out = match reaped {
            Some(rx) => {
                tokio::task::spawn_blocking(move || rx.recv_timeout(CLOSE_WAIT_TIMEOUT).is_err())
                    .await
                    .unwrap_or(true)
            }
            None => false,
        };
        if timed_out {
            log::warn!("pty {session_id}: reaper timed out after {CLOSE_WAIT_TIMEOUT:?}, force-killing");
            let mut killer = match session.killer.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            if let Err(e) = killer.kill() {
                log::warn!("pty {session_id}: force kill failed: {e}");
            }
        }
        log::info!("pty {session_id}: closed");
        Ok(())
    }

    /// Closes every session. Used by top-level shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.close(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_clamping() {
        assert_eq!(clamp_dimensions(80, 24), (80, 24));
        assert_eq!(clamp_dimensions(0, 24), (120, 30));
        assert_eq!(clamp_dimensions(80, 0), (120, 30));
        assert_eq!(clamp_dimensions(501, 24), (120, 30));
    }

    #[tokio::test]
    async fn unknown_shell_fails_before_spawn() {
        let engine = PtyEngine::new(EventBus::default());
        let err = engine
            .start("definitely-not-a-shell-9321", "s-1", 80, 24, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test]
    async fn write_to_unknown_session_is_not_found() {
        let engine = PtyEngine::new(EventBus::default());
        assert!(matches!(
            engine.write("ghost", b"ls\r").unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let engine = PtyEngine::new(EventBus::default());
        engine.close("never-existed").await.unwrap();
        engine.close("never-existed").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_stream_and_close_roundtrip() {
        let engine = PtyEngine::new(EventBus::default());
        let mut rx = engine.bus.subscribe();
        if engine
            .start("sh", "s-rt", 80, 24, None, None)
            .await
            .is_err()
        {
            // No usable /dev/ptmx in this environment; nothing to assert.
            return;
        }
        engine.write("s-rt", b"echo thermic-ok\r").unwrap();

        let mut collected = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(250), rx.recv()).await {
                Ok(Ok(Event::TerminalOutput { data, .. })) => {
                    collected.extend_from_slice(&data);
                    if String::from_utf8_lossy(&collected).contains("thermic-ok") {
                        break;
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) => break,
                Err(_) => {}
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("thermic-ok"));
        engine.close("s-rt").await.unwrap();
        assert_eq!(engine.active_count(), 0);
    }
}
