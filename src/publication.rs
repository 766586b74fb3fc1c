// Copyright 2026 subtrie-broker contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

// Reformats a raw UDP publication datagram into the wire layout
// subscribers receive on a PUBLISH frame:
//
//   <ip> " " <port> " " <topic padded to MAX_TOPIC_LEN with nulls> <rest>
//
// The incoming datagram is `<topic, null-terminated><rest>`; the topic is
// the bytes before the first null within the first MAX_TOPIC_LEN bytes.

use std::net::SocketAddr;

pub const MAX_TOPIC_LEN: usize = 50;

/// Extracts the topic from a raw datagram: the bytes before the first
/// null found within the first `MAX_TOPIC_LEN` bytes. If no null appears
/// in that range, the topic is the first `MAX_TOPIC_LEN` bytes verbatim
/// and no terminator is consumed — `rest` then starts at byte
/// `MAX_TOPIC_LEN`, not one past a terminator that was never there.
pub fn split_datagram(datagram: &[u8]) -> (&[u8], &[u8]) {
    let scan_len = datagram.len().min(MAX_TOPIC_LEN);
    match datagram[..scan_len].iter().position(|&b| b == 0) {
        Some(nul) => (&datagram[..nul], &datagram[nul + 1..]),
        None => (&datagram[..scan_len], &datagram[scan_len..]),
    }
}

/// Builds the subscriber-facing PUBLISH payload for a datagram received
/// from `sender`. The result is capped at `max_len` bytes by truncating
/// `rest`; the address-and-topic prefix is never truncated.
pub fn format_publication(sender: SocketAddr, datagram: &[u8], max_len: usize) -> Vec<u8> {
    let (topic, rest) = split_datagram(datagram);

    let mut out = Vec::with_capacity(max_len.min(datagram.len() + MAX_TOPIC_LEN + 16));
    out.extend_from_slice(sender.ip().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(sender.port().to_string().as_bytes());
    out.push(b' ');

    let topic_len = topic.len().min(MAX_TOPIC_LEN);
    out.extend_from_slice(&topic[..topic_len]);
    out.resize(out.len() + (MAX_TOPIC_LEN - topic_len), 0);

    let budget = max_len.saturating_sub(out.len());
    let rest_len = rest.len().min(budget);
    out.extend_from_slice(&rest[..rest_len]);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str, port: u16) -> SocketAddr {
        format!("{}:{}", ip, port).parse().unwrap()
    }

    #[test]
    fn splits_topic_at_null_terminator() {
        let datagram = b"news/sport\0scores: 3-1";
        let (topic, rest) = split_datagram(datagram);
        assert_eq!(b"news/sport", topic);
        assert_eq!(b"scores: 3-1", rest);
    }

    #[test]
    fn missing_terminator_within_scan_window_takes_first_max_topic_len_bytes() {
        let datagram = [b'a'; 60];
        let (topic, rest) = split_datagram(&datagram);
        assert_eq!(MAX_TOPIC_LEN, topic.len());
        assert_eq!(10, rest.len());
        assert!(rest.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn formats_ip_port_and_padded_topic() {
        let out = format_publication(addr("127.0.0.1", 9000), b"a/b\0hello", 2048);

        let prefix = b"127.0.0.1 9000 ";
        assert!(out.starts_with(prefix));

        let topic_field = &out[prefix.len()..prefix.len() + MAX_TOPIC_LEN];
        assert!(topic_field.starts_with(b"a/b"));
        assert!(topic_field[3..].iter().all(|&b| b == 0));

        assert_eq!(b"hello", &out[prefix.len() + MAX_TOPIC_LEN..]);
    }

    #[test]
    fn truncates_rest_to_respect_max_len() {
        let rest = vec![b'x'; 100];
        let mut datagram = b"t\0".to_vec();
        datagram.extend_from_slice(&rest);

        let prefix_len = "127.0.0.1 9000 ".len() + MAX_TOPIC_LEN;
        let out = format_publication(addr("127.0.0.1", 9000), &datagram, prefix_len + 10);

        assert_eq!(prefix_len + 10, out.len());
    }

    #[test]
    fn max_len_smaller_than_prefix_yields_empty_rest() {
        let out = format_publication(addr("127.0.0.1", 9000), b"t\0data", 4);

        let prefix_len = "127.0.0.1 9000 ".len() + MAX_TOPIC_LEN;
        assert_eq!(prefix_len, out.len()); // prefix + topic is never truncated; rest is empty
    }
}
