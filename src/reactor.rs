// Copyright 2026 subtrie-broker contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

// The single-threaded readiness loop: one `mio::Poll` over stdin, the UDP
// publication socket, the TCP listen socket, and every connected
// subscriber, dispatching each ready fd to the right handler and driving
// the trie and client registry from one place.

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::os::unix::io::AsRawFd;

use mio::net::{TcpListener, UdpSocket};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::framing::MsgType;
use crate::ids::IdSequence;
use crate::publication;
use crate::registry::{Accepted, Handshake, PendingConn, Registry};
use crate::trie::{ClientId, Trie};

const TOKEN_STDIN: Token = Token(0);
const TOKEN_UDP: Token = Token(1);
const TOKEN_LISTENER: Token = Token(2);
const FIRST_DYNAMIC_TOKEN: usize = 3;

const UDP_RECV_BUF_SIZE: usize = 65536;
const EVENTS_CAPACITY: usize = 1024;

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    udp: UdpSocket,
    ids: IdSequence,
    pending: HashMap<Token, PendingConn>,
    token_to_id: HashMap<Token, ClientId>,
    registry: Registry,
    trie: Trie,
    exiting: bool,
}

impl Reactor {
    pub fn bind(port: u16) -> io::Result<Reactor> {
        let addr = format!("0.0.0.0:{}", port).parse().expect("valid socket address");

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        let mut udp = UdpSocket::bind(addr)?;

        poll.registry().register(
            &mut SourceFd(&io::stdin().as_raw_fd()),
            TOKEN_STDIN,
            Interest::READABLE,
        )?;
        poll.registry().register(&mut listener, TOKEN_LISTENER, Interest::READABLE)?;
        poll.registry().register(&mut udp, TOKEN_UDP, Interest::READABLE)?;

        Ok(Reactor {
            poll,
            listener,
            udp,
            ids: IdSequence::starting_at(FIRST_DYNAMIC_TOKEN),
            pending: HashMap::new(),
            token_to_id: HashMap::new(),
            registry: Registry::new(),
            trie: Trie::new(),
            exiting: false,
        })
    }

    /// Runs until the operator types `exit` on stdin. Returns `Ok(())` on a
    /// clean shutdown.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.exiting {
            self.poll.poll(&mut events, None)?;

            let ready: Vec<Token> = events.iter().map(|e| e.token()).collect();
            for token in ready {
                match token {
                    TOKEN_STDIN => self.handle_stdin()?,
                    TOKEN_UDP => self.handle_udp_readable()?,
                    TOKEN_LISTENER => self.handle_listener_readable()?,
                    token if self.pending.contains_key(&token) => {
                        self.handle_pending_readable(token)
                    }
                    token => self.handle_session_readable(token),
                }
            }
        }

        log::info!("shutting down, tearing down all sessions");
        self.registry.destroy_all(&mut self.trie);
        Ok(())
    }

    fn handle_stdin(&mut self) -> io::Result<()> {
        let mut line = String::new();
        let n = io::stdin().lock().read_line(&mut line)?;
        if n == 0 {
            // stdin closed (e.g. running detached): stop polling it rather
            // than treating an EOF the same as a typed "exit".
            let _ = self.poll.registry().deregister(&mut SourceFd(&0));
        } else if line == "exit\n" {
            self.exiting = true;
        }
        Ok(())
    }

    fn handle_udp_readable(&mut self) -> io::Result<()> {
        let mut buf = [0u8; UDP_RECV_BUF_SIZE];
        loop {
            match self.udp.recv_from(&mut buf) {
                Ok((n, sender)) => {
                    let payload = publication::format_publication(
                        sender,
                        &buf[..n],
                        crate::framing::MAX_PAYLOAD_LEN,
                    );
                    self.fan_out(&buf[..n], &payload);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn fan_out(&mut self, raw_datagram: &[u8], payload: &[u8]) {
        let (topic, _rest) = publication::split_datagram(raw_datagram);
        let topic = match std::str::from_utf8(topic) {
            Ok(t) => t,
            Err(_) => {
                log::warn!("dropping publication with non-utf8 topic");
                return;
            }
        };

        let recipients = match self.trie.publish(topic) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("publish on {:?} failed: {}", topic, e.0);
                return;
            }
        };

        for client in recipients {
            let sent = match self.registry.get_mut(&client) {
                Some(session) => session.send(MsgType::Publish, payload),
                None => continue,
            };
            if let Err(e) = sent {
                log::warn!("[{}] fatal error on publish send: {}", client, e);
                self.deactivate(&client);
            }
        }
    }

    fn handle_listener_readable(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    let token = Token(self.ids.next());
                    self.poll.registry().register(&mut stream, token, Interest::READABLE)?;
                    self.pending.insert(token, PendingConn::new(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn handle_pending_readable(&mut self, token: Token) {
        let Some(pending) = self.pending.get_mut(&token) else { return };

        let outcome = pending.handle_readable();
        match outcome {
            Ok(Handshake::Pending) => {}
            Ok(Handshake::Ready(id)) => {
                let pending = self.pending.remove(&token).expect("just looked it up");
                let stream = pending.into_stream();
                let _ = stream.set_nodelay(true);

                match self.registry.accept(id.clone(), token, stream) {
                    Accepted::Installed => {
                        self.token_to_id.insert(token, id);
                    }
                    Accepted::Rejected => {
                        // The duplicate socket was already consumed into
                        // `registry.accept`'s argument and dropped there;
                        // nothing further to deregister.
                    }
                }
            }
            Err(e) => {
                log::debug!("[{:?}] handshake failed: {}", token, e.0);
                if let Some(pending) = self.pending.remove(&token) {
                    pending.close(self.poll.registry());
                }
            }
        }
    }

    fn handle_session_readable(&mut self, token: Token) {
        let Some(id) = self.token_to_id.get(&token).cloned() else { return };
        let Some(session) = self.registry.get_mut(&id) else { return };

        if let Err(e) = session.handle_readable(&mut self.trie) {
            log::info!("[{}] disconnected: {}", id, e.0);
            self.deactivate(&id);
        }
    }

    fn deactivate(&mut self, id: &ClientId) {
        let poll_registry = self.poll.registry();
        if let Some(session) = self.registry.get_mut(id) {
            session.close(poll_registry);
            self.token_to_id.remove(&session.token);
        }
        self.registry.deactivate(id);
    }
}
