//! Data channel binary protocol
//!
//! Every frame starts with a 3 byte header: `event: u8`, `length: u16` (big
//! endian) giving the size of the body that follows.
//!
//! Client to server:
//! - `0x01` move: `x: u16, y: u16`
//! - `0x02` scroll: `dx: i16, dy: i16`
//! - `0x03` key down / `0x04` key up: `keysym: u32`
//! - `0x05` button down / `0x06` button up: `button: u32`
//!
//! Server to client:
//! - `0x01` cursor position: `x: u16, y: u16`
//! - `0x02` cursor image: `width, height, hotspot x, hotspot y: u16`, then PNG bytes

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::desktop::CursorImage;

const HEADER_LEN: usize = 3;

pub const OP_MOVE: u8 = 0x01;
pub const OP_SCROLL: u8 = 0x02;
pub const OP_KEY_DOWN: u8 = 0x03;
pub const OP_KEY_UP: u8 = 0x04;
pub const OP_BTN_DOWN: u8 = 0x05;
pub const OP_BTN_UP: u8 = 0x06;

pub const OP_CURSOR_POSITION: u8 = 0x01;
pub const OP_CURSOR_IMAGE: u8 = 0x02;

/// Input event decoded from a data channel frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Move { x: u16, y: u16 },
    Scroll { dx: i16, dy: i16 },
    KeyDown(u32),
    KeyUp(u32),
    ButtonDown(u32),
    ButtonUp(u32),
}

/// Parse one binary frame. Malformed frames are logged and dropped.
pub fn parse_input(data: &[u8]) -> Option<InputEvent> {
    if data.len() < HEADER_LEN {
        warn!("Data channel frame too short: {} bytes", data.len());
        return None;
    }

    let mut buf = data;
    let event = buf.get_u8();
    let length = buf.get_u16() as usize;
    if buf.len() < length {
        warn!(
            "Data channel frame truncated: header says {} bytes, got {}",
            length,
            buf.len()
        );
        return None;
    }
    let mut body = &buf[..length];

    if !(OP_MOVE..=OP_BTN_UP).contains(&event) {
        warn!("Unknown data channel event: {:#04x}", event);
        return None;
    }
    // every input event carries exactly four bytes
    if body.len() < 4 {
        warn!("Data channel event {:#04x} body too short", event);
        return None;
    }

    let input = match event {
        OP_MOVE => InputEvent::Move {
            x: body.get_u16(),
            y: body.get_u16(),
        },
        OP_SCROLL => InputEvent::Scroll {
            dx: body.get_i16(),
            dy: body.get_i16(),
        },
        OP_KEY_DOWN => InputEvent::KeyDown(body.get_u32()),
        OP_KEY_UP => InputEvent::KeyUp(body.get_u32()),
        OP_BTN_DOWN => InputEvent::ButtonDown(body.get_u32()),
        _ => InputEvent::ButtonUp(body.get_u32()),
    };
    Some(input)
}

fn header(buf: &mut BytesMut, event: u8, length: usize) {
    buf.put_u8(event);
    buf.put_u16(length as u16);
}

pub fn encode_cursor_position(x: i32, y: i32) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 4);
    header(&mut buf, OP_CURSOR_POSITION, 4);
    buf.put_u16(x.clamp(0, u16::MAX as i32) as u16);
    buf.put_u16(y.clamp(0, u16::MAX as i32) as u16);
    buf.freeze()
}

pub fn encode_cursor_image(cursor: &CursorImage) -> Bytes {
    let length = 8 + cursor.image.len();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + length);
    header(&mut buf, OP_CURSOR_IMAGE, length);
    buf.put_u16(cursor.width);
    buf.put_u16(cursor.height);
    buf.put_u16(cursor.x);
    buf.put_u16(cursor.y);
    buf.put_slice(&cursor.image);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move() {
        let data = [OP_MOVE, 0x00, 0x04, 0x01, 0x00, 0x00, 0x20];
        assert_eq!(parse_input(&data), Some(InputEvent::Move { x: 256, y: 32 }));
    }

    #[test]
    fn test_parse_negative_scroll() {
        let data = [OP_SCROLL, 0x00, 0x04, 0xFF, 0xFE, 0x00, 0x03];
        assert_eq!(parse_input(&data), Some(InputEvent::Scroll { dx: -2, dy: 3 }));
    }

    #[test]
    fn test_parse_key_and_button() {
        let data = [OP_KEY_DOWN, 0x00, 0x04, 0x00, 0x00, 0xFF, 0x0D];
        assert_eq!(parse_input(&data), Some(InputEvent::KeyDown(0xFF0D)));

        let data = [OP_BTN_UP, 0x00, 0x04, 0x00, 0x00, 0x00, 0x03];
        assert_eq!(parse_input(&data), Some(InputEvent::ButtonUp(3)));
    }

    #[test]
    fn test_reject_malformed() {
        assert_eq!(parse_input(&[]), None);
        assert_eq!(parse_input(&[OP_MOVE, 0x00]), None);
        // length claims more than present
        assert_eq!(parse_input(&[OP_MOVE, 0x00, 0x08, 0, 0, 0, 0]), None);
        // body shorter than the event needs
        assert_eq!(parse_input(&[OP_KEY_UP, 0x00, 0x02, 0, 0]), None);
        assert_eq!(parse_input(&[0x7F, 0x00, 0x00]), None);
    }

    #[test]
    fn test_encode_cursor_position() {
        let frame = encode_cursor_position(300, -5);
        assert_eq!(&frame[..], &[OP_CURSOR_POSITION, 0x00, 0x04, 0x01, 0x2C, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_cursor_image() {
        let cursor = CursorImage {
            width: 2,
            height: 3,
            x: 1,
            y: 0,
            image: Bytes::from_static(&[0xAA, 0xBB]),
            serial: 9,
        };
        let frame = encode_cursor_image(&cursor);
        assert_eq!(
            &frame[..],
            &[OP_CURSOR_IMAGE, 0x00, 0x0A, 0, 2, 0, 3, 0, 1, 0, 0, 0xAA, 0xBB]
        );
    }
}
