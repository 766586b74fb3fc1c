// Copyright 2026 subtrie-broker contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

// Length-prefixed TCP frame codec. A frame is a 6-byte header (2-byte
// type tag, 4-byte payload length, both network byte order) followed by
// that many payload bytes. Header integers are encoded with `byteorder`
// rather than scattering raw `to_be_bytes` calls through the session.

use std::io::{self, Cursor, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const HDR_SIZE: usize = 6;
pub const READ_BUF_SIZE: usize = 2048;
pub const MAX_PAYLOAD_LEN: usize = READ_BUF_SIZE - HDR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Subscribe,
    Unsubscribe,
    Publish,
    SubscribeAck,
    UnsubscribeAck,
}

impl MsgType {
    fn id(self) -> u16 {
        match self {
            MsgType::Subscribe => 1,
            MsgType::Unsubscribe => 2,
            MsgType::Publish => 3,
            MsgType::SubscribeAck => 4,
            MsgType::UnsubscribeAck => 5,
        }
    }

    fn from_id(id: u16) -> Option<MsgType> {
        match id {
            1 => Some(MsgType::Subscribe),
            2 => Some(MsgType::Unsubscribe),
            3 => Some(MsgType::Publish),
            4 => Some(MsgType::SubscribeAck),
            5 => Some(MsgType::UnsubscribeAck),
            _ => None,
        }
    }
}

/// A frame header as read off the wire: type tag (resolved, or `None` for
/// an unrecognized tag — unknown types are skipped, not fatal) and
/// payload length.
pub struct Header {
    pub msg_type: Option<MsgType>,
    pub payload_len: u32,
}

pub fn encode_header(buf: &mut [u8; HDR_SIZE], msg_type: MsgType, payload_len: u32) {
    let mut cursor = Cursor::new(&mut buf[..]);
    cursor.write_u16::<BigEndian>(msg_type.id()).expect("header buffer is exactly HDR_SIZE");
    cursor.write_u32::<BigEndian>(payload_len).expect("header buffer is exactly HDR_SIZE");
}

pub fn decode_header(buf: &[u8]) -> Header {
    debug_assert!(buf.len() >= HDR_SIZE);
    let mut cursor = Cursor::new(buf);
    let type_id = cursor.read_u16::<BigEndian>().expect("caller checked length");
    let payload_len = cursor.read_u32::<BigEndian>().expect("caller checked length");

    Header { msg_type: MsgType::from_id(type_id), payload_len }
}

/// Writes a full frame (header + payload), blocking the calling thread
/// until either everything is flushed or a fatal socket error occurs. The
/// broker deliberately treats a send as blocking even over a non-blocking
/// socket: a slow subscriber stalls the reactor rather than getting
/// dropped, a simplification traded for not needing per-session write
/// queues.
pub fn send_message<W: Write>(stream: &mut W, msg_type: MsgType, payload: &[u8]) -> io::Result<()> {
    let mut header = [0u8; HDR_SIZE];
    encode_header(&mut header, msg_type, payload.len() as u32);

    write_all_retrying(stream, &header)?;
    write_all_retrying(stream, payload)
}

fn write_all_retrying<W: Write>(stream: &mut W, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => buf = &buf[n..],
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Non-blocking sockets report a full send buffer as WouldBlock
            // rather than blocking; spin until the peer drains it instead
            // of surfacing this as a fatal send error.
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
