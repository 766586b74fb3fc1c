// Copyright 2026 subtrie-broker contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

// Per-connection client session: a fixed-capacity read buffer, a frame
// parser over it, and the subscription back-refs the trie needs to tear
// the client's subscriptions down on disconnect.

use std::io::{self, Read};

use mio::net::TcpStream;
use mio::Token;

use crate::error::Fatal;
use crate::framing::{self, MsgType, HDR_SIZE, MAX_PAYLOAD_LEN, READ_BUF_SIZE};
use crate::trie::{ClientId, NodeId, Trie};

pub struct Session {
    pub id: ClientId,
    pub token: Token,
    stream: TcpStream,
    buf: Box<[u8; READ_BUF_SIZE]>,
    len: usize,
    back_refs: Vec<NodeId>,
}

impl Session {
    pub fn new(id: ClientId, token: Token, stream: TcpStream) -> Session {
        Session {
            id,
            token,
            stream,
            buf: Box::new([0u8; READ_BUF_SIZE]),
            len: 0,
            back_refs: Vec::new(),
        }
    }

    /// Installs a freshly-accepted socket into a session reclaimed from the
    /// inactive table: new socket, new token, buffer reset, back-refs (and
    /// therefore trie entries) left untouched.
    pub fn reclaim(&mut self, token: Token, stream: TcpStream) {
        self.token = token;
        self.stream = stream;
        self.len = 0;
    }

    /// Deregisters the current socket from the poller and shuts it down,
    /// in preparation for moving this session to the inactive table. The
    /// session itself (id, back-refs) survives for a later reconnect.
    pub fn close(&mut self, poll_registry: &mio::Registry) {
        let _ = poll_registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    pub fn send(&mut self, msg_type: MsgType, payload: &[u8]) -> io::Result<()> {
        framing::send_message(&mut self.stream, msg_type, payload)
    }

    /// Reads whatever is immediately available and dispatches every
    /// complete frame found at the head of the buffer, in arrival order.
    /// A fatal I/O error, EOF, or protocol violation is surfaced to the
    /// caller, which tears the session down.
    pub fn handle_readable(&mut self, trie: &mut Trie) -> Result<(), Fatal> {
        let n = self.stream.read(&mut self.buf[self.len..])?;
        if n == 0 {
            return Err(Fatal(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed")));
        }
        self.len += n;

        let mut off = 0;
        while self.len - off >= HDR_SIZE {
            let header = framing::decode_header(&self.buf[off..off + HDR_SIZE]);
            let payload_len = header.payload_len as usize;

            if payload_len > MAX_PAYLOAD_LEN {
                return Err(Fatal(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "frame payload exceeds maximum size",
                )));
            }
            if self.len - off < HDR_SIZE + payload_len {
                break; // partial payload: wait for more data
            }

            let payload = &self.buf[off + HDR_SIZE..off + HDR_SIZE + payload_len];
            self.dispatch(trie, header.msg_type, payload)?;

            off += HDR_SIZE + payload_len;
        }

        if off > 0 {
            self.buf.copy_within(off..self.len, 0);
            self.len -= off;
        }

        Ok(())
    }

    fn dispatch(
        &mut self,
        trie: &mut Trie,
        msg_type: Option<MsgType>,
        payload: &[u8],
    ) -> Result<(), Fatal> {
        match msg_type {
            Some(MsgType::Subscribe) => {
                let pattern = std::str::from_utf8(payload)
                    .map_err(|_| Fatal(crate::error::invalid_data("pattern is not utf-8")))?;
                trie.subscribe(&self.id, pattern, &mut self.back_refs)?;
                self.send(MsgType::SubscribeAck, payload)?;
            }
            Some(MsgType::Unsubscribe) => {
                let pattern = std::str::from_utf8(payload)
                    .map_err(|_| Fatal(crate::error::invalid_data("pattern is not utf-8")))?;
                trie.unsubscribe(&self.id, pattern, &mut self.back_refs)?;
                self.send(MsgType::UnsubscribeAck, payload)?;
            }
            // Unknown message types (and types a subscriber would never
            // legitimately send, like PUBLISH/ACKs) are silently skipped.
            _ => {}
        }
        Ok(())
    }

    /// Removes every subscription this session holds and closes the
    /// socket.
    pub fn destroy(mut self, trie: &mut Trie) {
        trie.cleanup(&self.id, &mut self.back_refs);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
