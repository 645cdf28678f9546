//! Graphical remote sessions over the RDP protocol stack.
//!
//! The protocol layers (transport, X.224, MCS, security, PDU) come from
//! the `rdp` crate; this engine forwards decoded frame rectangles to the
//! frontend as base64 PNG in `rdp-bitmap-update` events and translates
//! frontend input into pointer/scancode messages. Frame decoding runs on
//! a dedicated OS thread per session.

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use dashmap::DashMap;
use rdp::core::client::{Connector, RdpClient};
use rdp::core::event::{BitmapEvent, KeyboardEvent, PointerButton, PointerEvent, RdpEvent};

use super::error::{CoreError, CoreResult};
use super::events::{Event, EventBus};
use super::profile_models::RdpConfig;
use crate::{MAX_RDP_SESSIONS, RDP_DIAL_TIMEOUT};

/// Socket read timeout inside the frame loop; keeps the client lock
/// cycling so input writes interleave with reads.
const FRAME_READ_TIMEOUT: Duration = Duration::from_millis(100);

struct RdpSessionEntry {
    client: Arc<Mutex<RdpClient<TcpStream>>>,
    socket: TcpStream,
    closing: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct RdpEngine {
    sessions: Arc<DashMap<String, RdpSessionEntry>>,
    bus: EventBus,
}

/// Converts an RDP-ordered pixel buffer to RGBA8. Supports the 16
/// (RGB565), 24 (BGR) and 32 (BGRA) bpp formats.
pub(crate) fn decode_pixels(bpp: u16, data: &[u8], pixels: usize) -> Option<Vec<u8>> {
    let mut rgba = Vec::with_capacity(pixels * 4);
    match bpp {
        16 => {
            if data.len() < pixels * 2 {
                return None;
            }
            for chunk in data.chunks_exact(2).take(pixels) {
                let v = u16::from_le_bytes([chunk[0], chunk[1]]);
                let r = ((v >> 11) & 0x1f) as u8;
                let g = ((v >> 5) & 0x3f) as u8;
                let b = (v & 0x1f) as u8;
                rgba.extend_from_slice(&[r << 3 | r >> 2, g << 2 | g >> 4, b << 3 | b >> 2, 255]);
            }
        }
        24 => {
            if data.len() < pixels * 3 {
                return None;
            }
            for chunk in data.chunks_exact(3).take(pixels) {
                rgba.extend_from_slice(&[chunk[2], chunk[1], chunk[0], 255]);
            }
        }
        32 => {
            if data.len() < pixels * 4 {
                return None;
            }
            for chunk in data.chunks_exact(4).take(pixels) {
                rgba.extend_from_slice(&[chunk[2], chunk[1], chunk[0], 255]);
            }
        }
        _ => return None,
    }
    Some(rgba)
}

/// RGBA8 buffer to an in-memory PNG.
pub(crate) fn encode_png(width: u16, height: u16, rgba: &[u8]) -> CoreResult<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width as u32, height as u32);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| CoreError::protocol(format!("png header: {e}")))?;
        writer
            .write_image_data(rgba)
            .map_err(|e| CoreError::protocol(format!("png encode: {e}")))?;
        writer
            .finish()
            .map_err(|e| CoreError::protocol(format!("png finish: {e}")))?;
    }
    Ok(out)
}

/// Frontend mouse button index to the protocol button.
pub(crate) fn map_pointer_button(button: u8) -> PointerButton {
    match button {
        1 => PointerButton::Left,
        2 => PointerButton::Middle,
        3 => PointerButton::Right,
        _ => PointerButton::None,
    }
}

fn bitmap_to_event(session_id: &str, bitmap: BitmapEvent) -> Option<Event> {
    let x = bitmap.dest_left;
    let y = bitmap.dest_top;
    let width = bitmap.width;
    let height = bitmap.height;
    let bpp = bitmap.bpp;
    let compressed = bitmap.is_compress;
    let data = if compressed {
        match bitmap.decompress() {
            Ok(data) => data,
            Err(e) => {
                log::debug!("rdp {session_id}: rect decompress failed: {e:?}");
                return None;
            }
        }
    } else {
        bitmap.data
    };
    let rgba = decode_pixels(bpp, &data, width as usize * height as usize)?;
    let png = encode_png(width, height, &rgba).ok()?;
    Some(Event::RdpBitmapUpdate {
        session_id: session_id.to_string(),
        x,
        y,
        w: width,
        h: height,
        image_data: base64::engine::general_purpose::STANDARD.encode(png),
    })
}

impl RdpEngine {
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

    /// Connects and starts the frame-forwarding thread. Emits
    /// `rdp-ready` on success; protocol failures after connect surface
    /// as `rdp-error` events.
    pub async fn connect(&self, session_id: &str, config: &RdpConfig) -> CoreResult<()> {
        config.validate()?;
        if self.sessions.len() >= MAX_RDP_SESSIONS && !self.sessions.contains_key(session_id) {
            return Err(CoreError::capacity(format!(
                "rdp session cap reached ({MAX_RDP_SESSIONS})"
            )));
        }
        if self.sessions.contains_key(session_id) {
            self.close(session_id);
        }

        let addr = resolve_addr(&config.host, config.port)?;
        let cfg = config.clone();
        let dial_host = config.host.clone();
        let (client, socket) = tokio::task::spawn_blocking(move || {
            let stream = TcpStream::connect_timeout(&addr, RDP_DIAL_TIMEOUT).map_err(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    CoreError::timeout(format!("rdp dial {dial_host} timed out"))
                } else {
                    CoreError::io(format!("rdp dial {dial_host}"), e)
                }
            })?;
            let socket = stream
                .try_clone()
                .map_err(|e| CoreError::io("rdp socket clone", e))?;
            let mut connector = Connector::new()
                .screen(cfg.width, cfg.height)
                .credentials(cfg.domain.clone(), cfg.username.clone(), cfg.password.clone())
                .check_certificate(false);
            let client = connector
                .connect(stream)
                .map_err(|e| CoreError::protocol(format!("rdp connect: {e:?}")))?;
            Ok::<_, CoreError>((client, socket))
        })
        .await
        .map_err(|e| CoreError::state(format!("rdp connect task failed: {e}")))??;

        // Keep the client lock cycling between frame batches.
        let _ = socket.set_read_timeout(Some(FRAME_READ_TIMEOUT));

        let client = Arc::new(Mutex::new(client));
        let closing = Arc::new(AtomicBool::new(false));
        self.sessions.insert(
            session_id.to_string(),
            RdpSessionEntry {
                client: client.clone(),
                socket,
                closing: closing.clone(),
            },
        );
        self.bus.emit(Event::RdpReady {
            session_id: session_id.to_string(),
        });

        let bus = self.bus.clone();
        let sessions = self.sessions.clone();
        let thread_id = session_id.to_string();
        std::thread::Builder::new()
            .name(format!("rdp-{session_id}"))
            .spawn(move || {
                loop {
                    if closing.load(Ordering::Acquire) {
                        break;
                    }
                    let result = {
                        let mut client = match client.lock() {
                            Ok(g) => g,
                            Err(e) => e.into_inner(),
                        };
                        let bus = bus.clone();
                        let id = thread_id.clone();
                        client.read(move |event| {
                            if let RdpEvent::Bitmap(bitmap) = event {
                                if let Some(update) = bitmap_to_event(&id, bitmap) {
                                    bus.emit(update);
                                }
                            }
                        })
                    };
                    if let Err(e) = result {
                        if is_transient_read_error(&e) {
                            continue;
                        }
                        if !closing.load(Ordering::Acquire) {
                            log::warn!("rdp {thread_id}: protocol error: {e:?}");
                            bus.emit(Event::RdpError {
                                session_id: thread_id.clone(),
                                message: format!("{e:?}"),
                            });
                        }
                        break;
                    }
                }
                sessions.remove(&thread_id);
                bus.emit(Event::RdpClosed {
                    session_id: thread_id.clone(),
                });
                log::info!("rdp {thread_id}: frame loop exited");
            })
            .map_err(|e| CoreError::io("spawn rdp thread", e))?;

        log::info!(
            "rdp {session_id}: connected to {}:{} at {}x{}",
            config.host,
            config.port,
            config.width,
            config.height
        );
        Ok(())
    }

    /// Translates a frontend mouse event into a pointer message.
    pub fn send_mouse_event(
        &self,
        session_id: &str,
        x: u16,
        y: u16,
        button: u8,
        pressed: bool,
    ) -> CoreResult<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CoreError::not_found("rdp session", session_id))?;
        let mut client = match session.client.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        client
            .write(RdpEvent::Pointer(PointerEvent {
                x,
                y,
                button: map_pointer_button(button),
                down: pressed,
            }))
            .map_err(|e| CoreError::protocol(format!("rdp pointer write: {e:?}")))
    }

    /// Translates a frontend key event into a scancode message.
    pub fn send_key_event(
        &self,
        session_id: &str,
        scancode: u16,
        pressed: bool,
    ) -> CoreResult<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CoreError::not_found("rdp session", session_id))?;
        let mut client = match session.client.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        client
            .write(RdpEvent::Key(KeyboardEvent {
                code: scancode,
                down: pressed,
            }))
            .map_err(|e| CoreError::protocol(format!("rdp key write: {e:?}")))
    }

    /// Tears the session down: the socket shutdown unblocks the frame
    /// loop, which removes the entry and emits `rdp-closed`.
    pub fn close(&self, session_id: &str) {
        if let Some(session) = self.sessions.get(session_id) {
            session.closing.store(true, Ordering::Release);
            let _ = session.socket.shutdown(Shutdown::Both);
            let mut client = match session.client.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            if let Err(e) = client.shutdown() {
                log::debug!("rdp {session_id}: shutdown returned {e:?}");
            }
        }
    }

    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id);
        }
    }
}

fn resolve_addr(host: &str, port: u16) -> CoreResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| CoreError::io(format!("resolve {host}"), e))?
        .next()
        .ok_or_else(|| CoreError::validation(format!("host {host:?} resolved to no addresses")))
}

fn is_transient_read_error(e: &rdp::model::error::Error) -> bool {
    match e {
        rdp::model::error::Error::Io(io) => matches!(
            io.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_decoding_by_depth() {
        // 16 bpp: pure red in RGB565 is 0xf800.
        let rgba = decode_pixels(16, &0xf800u16.to_le_bytes(), 1).unwrap();
        assert_eq!(rgba, vec![255, 0, 0, 255]);
        // 24 bpp: BGR ordering.
        let rgba = decode_pixels(24, &[255, 0, 0], 1).unwrap();
        assert_eq!(rgba, vec![0, 0, 255, 255]);
        // 32 bpp: BGRA ordering, alpha forced opaque.
        let rgba = decode_pixels(32, &[0, 255, 0, 0], 1).unwrap();
        assert_eq!(rgba, vec![0, 255, 0, 255]);
        // Unsupported depth.
        assert!(decode_pixels(8, &[0], 1).is_none());
        // Short buffer.
        assert!(decode_pixels(32, &[0, 0], 1).is_none());
    }

    #[test]
    fn png_output_carries_signature() {
        let rgba = vec![128u8; 2 * 2 * 4];
        let png = encode_png(2, 2, &rgba).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn button_mapping() {
        assert!(matches!(map_pointer_button(1), PointerButton::Left));
        assert!(matches!(map_pointer_button(2), PointerButton::Middle));
        assert!(matches!(map_pointer_button(3), PointerButton::Right));
        assert!(matches!(map_pointer_button(0), PointerButton::None));
    }

    #[tokio::test]
    async fn connect_validates_config_first() {
        let engine = RdpEngine::new(EventBus::default());
        let bad = RdpConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            engine.connect("r-1", &bad).await.unwrap_err(),
            CoreError::Validation(_)
        ));
    }
}
