// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Dish record and the stream framing shared by the fifo, pipe and socket
// backends:
//
//     [terminal: u8][length: u32 LE][type: length bytes]
//
// The message-queue and shared-memory backends carry the same two fields in
// fixed-size records and reuse `Item::from_wire` for validation.

use std::io::{self, Read, Write};

/// Longest dish type that fits a record (one length byte on the fixed-size
/// wires).
pub const MAX_TYPE_LEN: usize = 255;

const HEADER_LEN: usize = 1 + 4;

/// One dish on the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Item {
    pub kind: String,
    /// Set on exactly one dish per run: the last unit of the last task.
    pub terminal: bool,
}

impl Item {
    pub fn new(kind: impl Into<String>, terminal: bool) -> io::Result<Self> {
        let kind = kind.into();
        check_len(kind.len())?;
        Ok(Self { kind, terminal })
    }

    /// Validate a record received from any backend.
    pub fn from_wire(terminal: u8, bytes: &[u8]) -> io::Result<Self> {
        let terminal = match terminal {
            0 => false,
            1 => true,
            other => return Err(invalid(format!("terminal flag {other} is not 0 or 1"))),
        };
        check_len(bytes.len())?;
        let kind = std::str::from_utf8(bytes)
            .map_err(|_| invalid("dish type is not valid UTF-8".to_owned()))?
            .to_owned();
        Ok(Self { kind, terminal })
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn check_len(len: usize) -> io::Result<()> {
    if len == 0 {
        return Err(invalid("empty dish type".to_owned()));
    }
    if len > MAX_TYPE_LEN {
        return Err(invalid(format!(
            "dish type of {len} bytes exceeds {MAX_TYPE_LEN}"
        )));
    }
    Ok(())
}

/// Write one framed item. The whole frame goes out in a single `write_all`
/// so a frame never interleaves with anything else on the stream.
pub fn write_frame<W: Write>(w: &mut W, item: &Item) -> io::Result<()> {
    check_len(item.kind.len())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + item.kind.len());
    buf.push(item.terminal as u8);
    buf.extend_from_slice(&(item.kind.len() as u32).to_le_bytes());
    buf.extend_from_slice(item.kind.as_bytes());
    w.write_all(&buf)?;
    w.flush()
}

/// Read one framed item, blocking until it is complete.
///
/// End of stream before the first byte or mid-frame is `UnexpectedEof`;
/// a malformed header is `InvalidData`.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Item> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    check_len(len)?;
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Item::from_wire(header[0], &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let mut out = Vec::new();
        write_frame(&mut out, &Item::new("cup", true).unwrap()).unwrap();
        assert_eq!(out, [1, 3, 0, 0, 0, b'c', b'u', b'p']);
    }

    #[test]
    fn frames_read_back_in_order() {
        let mut out = Vec::new();
        write_frame(&mut out, &Item::new("plate", false).unwrap()).unwrap();
        write_frame(&mut out, &Item::new("cup", true).unwrap()).unwrap();

        let mut r = io::Cursor::new(out);
        assert_eq!(read_frame(&mut r).unwrap(), Item::new("plate", false).unwrap());
        assert_eq!(read_frame(&mut r).unwrap(), Item::new("cup", true).unwrap());
        let eof = read_frame(&mut r).unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn rejects_bad_terminal_flag() {
        let mut r = io::Cursor::new(vec![7, 1, 0, 0, 0, b'x']);
        assert_eq!(read_frame(&mut r).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_oversized_length() {
        let mut r = io::Cursor::new(vec![0, 0, 1, 0, 0]);
        assert_eq!(read_frame(&mut r).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_zero_length() {
        let mut r = io::Cursor::new(vec![0, 0, 0, 0, 0]);
        assert_eq!(read_frame(&mut r).unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_body_is_eof() {
        let mut r = io::Cursor::new(vec![0, 4, 0, 0, 0, b'c', b'u']);
        assert_eq!(read_frame(&mut r).unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(Item::from_wire(0, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn new_checks_length() {
        assert!(Item::new("", false).is_err());
        assert!(Item::new("x".repeat(MAX_TYPE_LEN), false).is_ok());
        assert!(Item::new("x".repeat(MAX_TYPE_LEN + 1), false).is_err());
    }
}
