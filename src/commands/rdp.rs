//! RDP input forwarding.

use crate::core::error::CoreResult;
use crate::App;

/// Forwards a frontend mouse event into protocol pointer messages.
/// `button`: 1 left, 2 middle, 3 right, anything else is a move.
pub fn send_rdp_mouse_event(
    app: &App,
    session_id: &str,
    x: u16,
    y: u16,
    button: u8,
    pressed: bool,
) -> CoreResult<()> {
    app.rdp.send_mouse_event(session_id, x, y, button, pressed)
}

/// Forwards a frontend key event as a protocol scancode message.
pub fn send_rdp_key_event(
    app: &App,
    session_id: &str,
    scancode: u16,
    pressed: bool,
) -> CoreResult<()> {
    app.rdp.send_key_event(session_id, scancode, pressed)
}
