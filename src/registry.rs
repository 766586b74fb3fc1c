// Copyright 2026 subtrie-broker contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

// Client registry: the active/inactive session tables plus the pending
// sockets that have been accepted but have not yet sent their id
// handshake line.

use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use mio::net::TcpStream;
use mio::Token;

use crate::error::Fatal;
use crate::session::Session;
use crate::trie::ClientId;

const MAX_ID_LEN: usize = 15;

/// Outcome of feeding a pending connection more bytes.
pub enum Handshake {
    /// The id line has not arrived yet; keep waiting.
    Pending,
    /// The id line arrived; the connection is ready to be promoted.
    Ready(ClientId),
}

/// An accepted socket still waiting for its id line. Kept separate from
/// `Session` so a slow or hostile handshake can never be mistaken for an
/// established session's frame buffer.
pub struct PendingConn {
    stream: TcpStream,
    buf: [u8; MAX_ID_LEN],
    len: usize,
}

impl PendingConn {
    pub fn new(stream: TcpStream) -> PendingConn {
        PendingConn { stream, buf: [0u8; MAX_ID_LEN], len: 0 }
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Drops a pending connection that will never become a session
    /// (rejected duplicate id, failed handshake), deregistering its
    /// socket from the poller first.
    pub fn close(mut self, poll_registry: &mio::Registry) {
        let _ = poll_registry.deregister(&mut self.stream);
    }

    /// Reads whatever is available and checks for a complete id line.
    /// The id is whatever precedes the first `\r` or `\n`, or — once the
    /// 15-byte buffer fills without either — the full buffer contents.
    pub fn handle_readable(&mut self) -> Result<Handshake, Fatal> {
        if self.len == self.buf.len() {
            return Ok(Handshake::Ready(parse_id(&self.buf[..self.len])));
        }

        let n = self.stream.read(&mut self.buf[self.len..])?;
        if n == 0 {
            return Err(Fatal(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed during handshake",
            )));
        }
        self.len += n;

        match self.buf[..self.len].iter().position(|&b| b == b'\n') {
            Some(nl) => Ok(Handshake::Ready(parse_id(&self.buf[..nl]))),
            None if self.len == self.buf.len() => Ok(Handshake::Ready(parse_id(&self.buf[..self.len]))),
            None => Ok(Handshake::Pending),
        }
    }
}

/// Builds a client id from handshake bytes, truncating at the first `\r`
/// so a `\r\n`-terminated line doesn't bake a trailing carriage return
/// into the id (and therefore into registry lookups and reconnect
/// matching).
fn parse_id(bytes: &[u8]) -> ClientId {
    let end = bytes.iter().position(|&b| b == b'\r').unwrap_or(bytes.len());
    Rc::from(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// What the caller should do with a newly-handshaked connection.
pub enum Accepted {
    /// Id was already connected: the new socket must be dropped.
    Rejected,
    /// A session (new or reclaimed) is ready to read/write.
    Installed,
}

pub struct Registry {
    active: HashMap<ClientId, Session>,
    inactive: HashMap<ClientId, Session>,
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Registry {
        Registry { active: HashMap::new(), inactive: HashMap::new() }
    }

    /// Applies the three-way accept rule: reject a duplicate of an
    /// already-active id, reclaim an inactive session by id, or create a
    /// fresh one. `token` is the `mio::Token` the reactor already
    /// registered the socket under.
    pub fn accept(&mut self, id: ClientId, token: Token, stream: TcpStream) -> Accepted {
        if self.active.contains_key(&id) {
            log::warn!("[{}] already connected, rejecting new socket", id);
            return Accepted::Rejected;
        }

        if let Some(mut session) = self.inactive.remove(&id) {
            session.reclaim(token, stream);
            self.active.insert(id, session);
            return Accepted::Installed;
        }

        self.active.insert(id.clone(), Session::new(id, token, stream));
        Accepted::Installed
    }

    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut Session> {
        self.active.get_mut(id)
    }

    /// Moves a session from active to inactive on fatal error or peer
    /// close. Callers are expected to have already closed the session's
    /// socket (see `Session::close`); the trie entries and back-refs
    /// survive untouched for a later reconnect.
    pub fn deactivate(&mut self, id: &ClientId) {
        if let Some(session) = self.active.remove(id) {
            self.inactive.insert(id.clone(), session);
        }
    }

    /// Tears every active and inactive session down, unsubscribing each
    /// from the trie (broker shutdown).
    pub fn destroy_all(&mut self, trie: &mut crate::trie::Trie) {
        for (_, session) in self.active.drain() {
            session.destroy(trie);
        }
        for (_, session) in self.inactive.drain() {
            session.destroy(trie);
        }
    }
}
