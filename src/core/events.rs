//! Typed event bus between the core and the presentation frontend.
//!
//! The source of truth for event names is the outbound interface list:
//! one enum variant per name, with concrete payload fields. The wire
//! encoding stays free-form (serde/JSON) so frontends remain
//! language-agnostic. The core publishes and never subscribes to itself.

use serde::Serialize;
use tokio::sync::broadcast;

use super::tab_supervisor::{ConnectionKind, SessionStatus};

/// Default buffer depth for the broadcast channel. Slow consumers lag and
/// lose events rather than applying backpressure to session readers.
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// What happened to a profile file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileChangeKind {
    Created,
    Modified,
    Deleted,
}

/// Every event the core emits to the frontend.
///
/// `terminal-output` carries raw bytes: the core is a transparent pipe
/// and must not transcode (split UTF-8 sequences included).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all_fields = "camelCase")]
pub enum Event {
    #[serde(rename = "terminal-output")]
    TerminalOutput { session_id: String, data: Vec<u8> },

    #[serde(rename = "terminal-size-request")]
    TerminalSizeRequest { session_id: String },

    #[serde(rename = "terminal-size-sync-request")]
    TerminalSizeSyncRequest { session_id: String, immediate: bool },

    #[serde(rename = "tab-switched")]
    TabSwitched {
        tab_id: String,
        kind: ConnectionKind,
        status: SessionStatus,
    },

    #[serde(rename = "tab-status-update")]
    TabStatusUpdate {
        tab_id: String,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "host-key-prompt")]
    HostKeyPrompt {
        session_id: String,
        host: String,
        old_fingerprint: String,
        new_fingerprint: String,
    },

    #[serde(rename = "profile:updated")]
    ProfileUpdated {
        change_kind: ProfileChangeKind,
        path: String,
        id: String,
    },

    #[serde(rename = "sftp-reconnected")]
    SftpReconnected { session_id: String },

    #[serde(rename = "tab-reconnected-sizing")]
    TabReconnectedSizing { tab_id: String, session_id: String },

    #[serde(rename = "rdp-bitmap-update")]
    RdpBitmapUpdate {
        session_id: String,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        image_data: String,
    },

    #[serde(rename = "rdp-ready")]
    RdpReady { session_id: String },

    #[serde(rename = "rdp-error")]
    RdpError { session_id: String, message: String },

    #[serde(rename = "rdp-closed")]
    RdpClosed { session_id: String },
}

impl Event {
    /// The wire-level event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TerminalOutput { .. } => "terminal-output",
            Self::TerminalSizeRequest { .. } => "terminal-size-request",
            Self::TerminalSizeSyncRequest { .. } => "terminal-size-sync-request",
            Self::TabSwitched { .. } => "tab-switched",
            Self::TabStatusUpdate { .. } => "tab-status-update",
            Self::HostKeyPrompt { .. } => "host-key-prompt",
            Self::ProfileUpdated { .. } => "profile:updated",
            Self::SftpReconnected { .. } => "sftp-reconnected",
            Self::TabReconnectedSizing { .. } => "tab-reconnected-sizing",
            Self::RdpBitmapUpdate { .. } => "rdp-bitmap-update",
            Self::RdpReady { .. } => "rdp-ready",
            Self::RdpError { .. } => "rdp-error",
            Self::RdpClosed { .. } => "rdp-closed",
        }
    }
}

/// Cheap-to-clone publish handle. Delivery is best-effort and
/// non-blocking: with no subscribers, or with lagging subscribers, events
/// are dropped silently.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event. Never blocks, never fails.
    pub fn emit(&self, event: Event) {
        log::trace!("emit {}", event.name());
        let _ = self.tx.send(event);
    }

    /// Subscribes a frontend consumer. Receivers that fall more than the
    /// bus capacity behind observe `RecvError::Lagged` and skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::default();
        bus.emit(Event::TerminalSizeRequest {
            session_id: "s".into(),
        });
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(Event::SftpReconnected {
            session_id: "s-1".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "sftp-reconnected");
    }

    #[test]
    fn serialized_form_is_name_plus_payload() {
        let event = Event::TabReconnectedSizing {
            tab_id: "t-1".into(),
            session_id: "s-1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "tab-reconnected-sizing");
        assert_eq!(json["payload"]["tabId"], "t-1");
    }

    #[test]
    fn terminal_output_preserves_bytes() {
        let data = vec![0xff, 0x00, 0x1b, b'[', b'3', b'1', b'm'];
        let event = Event::TerminalOutput {
            session_id: "s".into(),
            data: data.clone(),
        };
        match event {
            Event::TerminalOutput { data: d, .. } => assert_eq!(d, data),
            _ => unreachable!(),
        }
    }
}
