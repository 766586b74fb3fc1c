// Copyright 2026 subtrie-broker contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

// Wildcard topic trie. Nodes live in an arena (a growable slot table
// indexed by a small integer handle) instead of being wired together with
// `Rc<RefCell<_>>` cycles: a node's parent, its named children, and its
// plus/star children are all handles into the same arena, the same way
// this crate hands connections an integer `Token` identity instead of
// threading shared, mutable references through the tree.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error;

pub type NodeId = usize;
pub type ClientId = Rc<str>;

pub const ROOT: NodeId = 0;
pub const MAX_SEGMENTS: usize = 64;

/// How a node is linked from its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Link {
    Named(String),
    Plus,
    Star,
}

struct Node {
    parent: Option<(NodeId, Link)>,
    children: HashMap<String, NodeId>,
    plus: Option<NodeId>,
    star: Option<NodeId>,
    subscribers: HashSet<ClientId>,
}

impl Node {
    fn new(parent: Option<(NodeId, Link)>) -> Node {
        Node {
            parent,
            children: HashMap::new(),
            plus: None,
            star: None,
            subscribers: HashSet::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
            && self.children.is_empty()
            && self.plus.is_none()
            && self.star.is_none()
    }
}

pub struct Trie {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl Default for Trie {
    fn default() -> Trie {
        Trie::new()
    }
}

impl Trie {
    pub fn new() -> Trie {
        Trie { nodes: vec![Some(Node::new(None))], free: Vec::new() }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id].as_ref().expect("dangling NodeId")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id].as_mut().expect("dangling NodeId")
    }

    fn alloc(&mut self, parent: Option<(NodeId, Link)>) -> NodeId {
        let node = Node::new(parent);
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn free_node(&mut self, id: NodeId) {
        debug_assert_ne!(id, ROOT);
        self.nodes[id] = None;
        self.free.push(id);
    }

    fn child_or_create(&mut self, parent: NodeId, segment: &str) -> NodeId {
        match segment {
            "+" => {
                if let Some(id) = self.node(parent).plus {
                    return id;
                }
                let id = self.alloc(Some((parent, Link::Plus)));
                self.node_mut(parent).plus = Some(id);
                id
            }
            "*" => {
                if let Some(id) = self.node(parent).star {
                    return id;
                }
                let id = self.alloc(Some((parent, Link::Star)));
                self.node_mut(parent).star = Some(id);
                id
            }
            name => {
                if let Some(&id) = self.node(parent).children.get(name) {
                    return id;
                }
                let id = self.alloc(Some((parent, Link::Named(name.to_owned()))));
                self.node_mut(parent).children.insert(name.to_owned(), id);
                id
            }
        }
    }

    fn child_if_present(&self, parent: NodeId, segment: &str) -> Option<NodeId> {
        match segment {
            "+" => self.node(parent).plus,
            "*" => self.node(parent).star,
            name => self.node(parent).children.get(name).copied(),
        }
    }

    /// Idempotent: a second subscribe to the same pattern by the same
    /// client leaves the node's subscriber set (and the client's back-ref
    /// list) unchanged.
    pub fn subscribe(
        &mut self,
        client: &ClientId,
        pattern: &str,
        back_refs: &mut Vec<NodeId>,
    ) -> Result<(), error::Fatal> {
        let segments = split_pattern(pattern)?;

        let mut cur = ROOT;
        for segment in &segments {
            cur = self.child_or_create(cur, segment);
        }

        if self.node_mut(cur).subscribers.insert(client.clone()) {
            back_refs.push(cur);
        }

        Ok(())
    }

    /// Descends without creating nodes; fails if any segment is absent or
    /// if the client was never subscribed at the terminal node.
    pub fn unsubscribe(
        &mut self,
        client: &ClientId,
        pattern: &str,
        back_refs: &mut Vec<NodeId>,
    ) -> Result<(), error::Fatal> {
        let segments = split_pattern(pattern)?;

        let mut cur = ROOT;
        for segment in &segments {
            cur = self
                .child_if_present(cur, segment)
                .ok_or_else(|| error::Fatal(error::not_found("pattern not present in trie")))?;
        }

        if !self.node_mut(cur).subscribers.remove(client) {
            return Err(error::Fatal(error::not_found("client not subscribed to pattern")));
        }

        if let Some(pos) = back_refs.iter().position(|&n| n == cur) {
            back_refs.remove(pos);
        }

        self.prune(cur);

        Ok(())
    }

    /// Removes every subscription named in `back_refs`, in preparation for
    /// destroying a session.
    pub fn cleanup(&mut self, client: &ClientId, back_refs: &mut Vec<NodeId>) {
        for node_id in back_refs.drain(..) {
            self.node_mut(node_id).subscribers.remove(client);
            self.prune(node_id);
        }
    }

    /// Unlinks and frees `n` (and transitively its ancestors) once it has
    /// become empty in all four dimensions: no subscribers, no named
    /// children, no plus child, no star child.
    fn prune(&mut self, n: NodeId) {
        if n == ROOT || !self.node(n).is_empty() {
            return;
        }

        let (parent, link) = self.node(n).parent.clone().expect("non-root node has a parent");
        match link {
            Link::Named(name) => {
                self.node_mut(parent).children.remove(&name);
            }
            Link::Plus => self.node_mut(parent).plus = None,
            Link::Star => self.node_mut(parent).star = None,
        }
        self.free_node(n);
        self.prune(parent);
    }

    /// Matches `topic` against every subscribed pattern, returning each
    /// matching client exactly once.
    pub fn publish(&self, topic: &str) -> Result<Vec<ClientId>, error::Fatal> {
        let segments = split_topic(topic)?;

        let mut raw = Vec::new();
        self.collect(ROOT, &segments, 0, &mut raw);

        let deduped: HashSet<ClientId> = raw.into_iter().collect();
        Ok(deduped.into_iter().collect())
    }

    fn collect(&self, node: NodeId, segs: &[&str], idx: usize, out: &mut Vec<ClientId>) {
        let n = self.node(node);

        if let Some(star) = n.star {
            for j in idx..=segs.len() {
                self.collect(star, segs, j, out);
            }
        }

        if idx == segs.len() {
            out.extend(n.subscribers.iter().cloned());
            return;
        }

        if let Some(&child) = n.children.get(segs[idx]) {
            self.collect(child, segs, idx + 1, out);
        }
        if let Some(plus) = n.plus {
            self.collect(plus, segs, idx + 1, out);
        }
    }

    #[cfg(test)]
    fn has_named_child(&self, parent: NodeId, name: &str) -> bool {
        self.node(parent).children.contains_key(name)
    }
}

fn split_pattern(pattern: &str) -> Result<Vec<&str>, error::Fatal> {
    split_segments(pattern)
}

fn split_topic(topic: &str) -> Result<Vec<&str>, error::Fatal> {
    split_segments(topic)
}

/// Splits on `/` the way `strtok` does: leading, trailing, and repeated
/// delimiters produce no empty segments, so `"/a//b/"` and `"a/b"` tokenize
/// identically.
fn split_segments(s: &str) -> Result<Vec<&str>, error::Fatal> {
    let segments: Vec<&str> = s.split('/').filter(|seg| !seg.is_empty()).collect();
    if segments.len() > MAX_SEGMENTS {
        return Err(error::Fatal(error::invalid_input("too many segments")));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str) -> ClientId {
        Rc::from(id)
    }

    #[test]
    fn basic_subscribe_and_publish() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "news/sport", &mut refs).unwrap();

        let matches = trie.publish("news/sport").unwrap();
        assert_eq!(vec![c1], matches);
    }

    #[test]
    fn single_level_wildcard() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "a/+/c", &mut refs).unwrap();

        assert_eq!(vec![c1.clone()], trie.publish("a/b/c").unwrap());
        assert!(trie.publish("a/b/d").unwrap().is_empty());
        assert!(trie.publish("a/b/c/d").unwrap().is_empty());
    }

    #[test]
    fn multi_level_wildcard_matches_zero_segments() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "a/*", &mut refs).unwrap();

        assert_eq!(vec![c1.clone()], trie.publish("a").unwrap());
        assert_eq!(vec![c1.clone()], trie.publish("a/b/c/d").unwrap());
        assert!(trie.publish("b/a").unwrap().is_empty());
    }

    #[test]
    fn deduplicates_a_client_matched_by_two_patterns() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "a/+/c", &mut refs).unwrap();
        trie.subscribe(&c1, "a/b/c", &mut refs).unwrap();

        assert_eq!(vec![c1], trie.publish("a/b/c").unwrap());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "t", &mut refs).unwrap();
        trie.subscribe(&c1, "t", &mut refs).unwrap();
        assert_eq!(1, refs.len());

        trie.unsubscribe(&c1, "t", &mut refs).unwrap();
        assert!(refs.is_empty());
        assert!(trie.publish("t").unwrap().is_empty());
    }

    #[test]
    fn pruning_removes_dangling_ancestors() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "x/y/z", &mut refs).unwrap();
        trie.unsubscribe(&c1, "x/y/z", &mut refs).unwrap();

        assert!(!trie.has_named_child(ROOT, "x"));
    }

    #[test]
    fn unsubscribe_unknown_pattern_is_an_error() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        assert!(trie.unsubscribe(&c1, "never/subscribed", &mut refs).is_err());
    }

    #[test]
    fn cleanup_removes_every_subscription_for_the_client() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "a/b", &mut refs).unwrap();
        trie.subscribe(&c1, "c/+", &mut refs).unwrap();

        trie.cleanup(&c1, &mut refs);

        assert!(refs.is_empty());
        assert!(trie.publish("a/b").unwrap().is_empty());
        assert!(!trie.has_named_child(ROOT, "a"));
    }

    #[test]
    fn reconnect_preserves_subscriptions_across_back_ref_moves() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "t", &mut refs).unwrap();
        // simulate a disconnect/reconnect cycle: the session object moves
        // but `refs` (its back-ref list) and the trie entries are untouched.
        let refs_after_reconnect = refs.clone();

        assert_eq!(vec![c1], trie.publish("t").unwrap());
        assert_eq!(refs, refs_after_reconnect);
    }

    #[test]
    fn leading_trailing_and_doubled_slashes_are_ignored() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");

        trie.subscribe(&c1, "t/", &mut refs).unwrap();

        assert_eq!(vec![c1.clone()], trie.publish("t").unwrap());
        assert_eq!(vec![c1], trie.publish("/t").unwrap());
        assert_eq!(1, refs.len());
    }

    #[test]
    fn pattern_with_too_many_segments_is_rejected() {
        let mut trie = Trie::new();
        let mut refs = Vec::new();
        let c1 = client("C1");
        let pattern = "a/".repeat(65) + "b";

        assert!(trie.subscribe(&c1, &pattern, &mut refs).is_err());
    }
}
