use std::collections::{HashMap, HashSet};

use crate::model::Comment;

pub type NodeId = usize;

/// Delivery state of a comment in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Confirmed,
    Sending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    Collapsed,
    Expanded,
    /// Expanded, but the replies still have to be fetched.
    NeedsReplies,
}

#[derive(Debug, Clone)]
struct Node {
    comment: Comment,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    replies_loaded: bool,
    reply_hint: u32,
    send: SendState,
}

/// One line of the flattened, render-ordered tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<'a> {
    pub comment: &'a Comment,
    pub depth: usize,
    pub reply_count: u32,
    pub expanded: bool,
    pub loading: bool,
    pub send: SendState,
}

/// A subtree unlinked from the tree, kept so it can be put back.
#[derive(Debug, Clone)]
pub struct Detached {
    epoch: u64,
    root: NodeId,
    parent: Option<NodeId>,
    position: usize,
    size: usize,
}

impl Detached {
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Serializable view of the tree used by navigation capsules.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TreeSnapshot {
    pub roots: Vec<Comment>,
    pub expanded: HashSet<String>,
}

/// Comments of one thread held in an arena. Ids resolve through an index, so
/// a node is found in one step at any depth.
#[derive(Debug, Default)]
pub struct CommentTree {
    nodes: Vec<Option<Node>>,
    roots: Vec<NodeId>,
    index: HashMap<String, NodeId>,
    expanded: HashSet<String>,
    loading: HashSet<String>,
    epoch: u64,
}

impl CommentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Comment> {
        self.node(id).map(|node| &node.comment)
    }

    pub fn send_state(&self, id: &str) -> Option<SendState> {
        self.node(id).map(|node| node.send)
    }

    pub fn replies_loaded(&self, id: &str) -> bool {
        self.node(id).is_some_and(|node| node.replies_loaded)
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        let node = self.node(id)?;
        let parent = self.nodes.get(node.parent?)?.as_ref()?;
        Some(parent.comment.id.as_str())
    }

    pub fn root_ids(&self) -> Vec<String> {
        self.roots
            .iter()
            .filter_map(|&id| self.node_at(id))
            .map(|node| node.comment.id.clone())
            .collect()
    }

    pub fn child_ids(&self, id: &str) -> Vec<String> {
        self.node(id)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|&child| self.node_at(child))
                    .map(|child| child.comment.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replies known for `id`: the materialized list when fetched, otherwise
    /// the server's count plus any local replies.
    pub fn reply_count(&self, id: &str) -> u32 {
        match self.node(id) {
            Some(node) if node.replies_loaded => node.children.len() as u32,
            Some(node) => node.reply_hint + node.children.len() as u32,
            None => 0,
        }
    }

    pub fn depth(&self, id: &str) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            current = self.node_at(parent)?;
            depth += 1;
        }
        Some(depth)
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.loading.contains(id)
    }

    /// Expanded comments whose replies were never fetched, in id order.
    pub fn unfetched_expanded(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .expanded
            .iter()
            .filter(|id| {
                self.node(id).is_some_and(|node| {
                    !node.replies_loaded
                        && node.reply_hint > 0
                        && node.send == SendState::Confirmed
                })
            })
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn set_loading(&mut self, id: &str, loading: bool) {
        if loading {
            self.loading.insert(id.to_string());
        } else {
            self.loading.remove(id);
        }
    }

    /// Replaces the roots with a freshly fetched top-level list. Local
    /// comments that the server has not confirmed stay at the end.
    pub fn replace_roots(&mut self, comments: Vec<Comment>) {
        let pending: Vec<(Comment, SendState)> = self
            .roots
            .iter()
            .filter_map(|&id| self.node_at(id))
            .filter(|node| node.send != SendState::Confirmed)
            .map(|node| (node.comment.clone(), node.send))
            .collect();

        self.nodes.clear();
        self.roots.clear();
        self.index.clear();
        self.loading.clear();
        self.epoch += 1;

        for comment in comments {
            let id = self.insert_server(comment, None);
            self.roots.push(id);
        }
        for (comment, send) in pending {
            if self.index.contains_key(&comment.id) {
                continue;
            }
            let id = self.insert_server(comment, None);
            if let Some(node) = self.node_at_mut(id) {
                node.send = send;
            }
            self.roots.push(id);
        }
    }

    /// Splices one fetched level of replies under `parent_id`. A reply that
    /// is already in the tree keeps its node, so its own replies, expansion
    /// and drafts survive. Unconfirmed local replies are kept after the
    /// server list, and so is any dropped reply that still holds one.
    /// Returns false when the parent is not in the tree.
    pub fn set_replies(&mut self, parent_id: &str, replies: Vec<Comment>) -> bool {
        let Some(&parent) = self.index.get(parent_id) else {
            return false;
        };
        self.loading.remove(parent_id);

        let listed: HashSet<String> = replies.iter().map(|reply| reply.id.clone()).collect();
        let old_children = self
            .node_at(parent)
            .map(|node| node.children.clone())
            .unwrap_or_default();
        let mut kept = Vec::new();
        for child in old_children {
            let (is_listed, confirmed) = match self.node_at(child) {
                Some(node) => (
                    listed.contains(&node.comment.id),
                    node.send == SendState::Confirmed,
                ),
                None => continue,
            };
            if is_listed {
                continue;
            }
            if confirmed && !self.holds_unsent(child) {
                self.free_subtree(child);
            } else {
                kept.push(child);
            }
        }

        let mut children = Vec::with_capacity(replies.len() + kept.len());
        for reply in replies {
            let node_id = match self.index.get(&reply.id).copied() {
                Some(existing) => {
                    if self.node_at(existing).and_then(|node| node.parent) != Some(parent) {
                        self.unlink(existing);
                    }
                    self.refresh_node(existing, parent, reply);
                    existing
                }
                None => self.insert_server(reply, Some(parent)),
            };
            children.push(node_id);
        }
        children.extend(kept);

        if let Some(node) = self.node_at_mut(parent) {
            node.children = children;
            node.replies_loaded = true;
        }
        true
    }

    /// Appends a locally authored comment under its parent, or as a new root.
    /// The comment starts in `Sending`; the parent is expanded so the new
    /// entry is visible.
    pub fn insert_optimistic(&mut self, comment: Comment) -> Option<NodeId> {
        if self.index.contains_key(&comment.id) {
            return None;
        }
        let parent = match comment.parent_comment_id.as_deref() {
            Some(parent_id) => Some(*self.index.get(parent_id)?),
            None => None,
        };
        let parent_key = comment.parent_comment_id.clone();
        let id = self.push_node(Node {
            comment,
            parent,
            children: Vec::new(),
            replies_loaded: true,
            reply_hint: 0,
            send: SendState::Sending,
        });
        match parent {
            Some(parent) => {
                if let Some(node) = self.node_at_mut(parent) {
                    node.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        if let Some(parent_key) = parent_key {
            self.expanded.insert(parent_key);
        }
        Some(id)
    }

    pub fn set_send_state(&mut self, id: &str, send: SendState) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.send = send;
                true
            }
            None => false,
        }
    }

    /// Swaps a temporary entry for the server's copy in place, keeping its
    /// position and any replies already attached to it.
    pub fn confirm(&mut self, temp_id: &str, mut confirmed: Comment) -> bool {
        let Some(&node_id) = self.index.get(temp_id) else {
            return false;
        };
        if confirmed.id != temp_id && self.index.contains_key(&confirmed.id) {
            // A refresh already brought the server copy in.
            self.unlink(node_id);
            self.free_subtree(node_id);
            return true;
        }
        confirmed.detailed_replies = None;
        let new_id = confirmed.id.clone();
        if let Some(node) = self.node_at_mut(node_id) {
            node.comment = confirmed;
            node.send = SendState::Confirmed;
        }
        self.index.remove(temp_id);
        self.index.insert(new_id.clone(), node_id);
        if self.expanded.remove(temp_id) {
            self.expanded.insert(new_id);
        }
        true
    }

    /// Sets the body of `id` and returns the previous one.
    pub fn set_content(&mut self, id: &str, content: &str) -> Option<String> {
        let node = self.node_mut(id)?;
        Some(std::mem::replace(
            &mut node.comment.content,
            content.to_string(),
        ))
    }

    /// Flips the view flag. Expanding a node whose replies were never
    /// fetched reports `NeedsReplies` so the caller can load them.
    pub fn toggle_expand(&mut self, id: &str) -> Option<Expand> {
        let node = self.node(id)?;
        let needs_fetch = !node.replies_loaded && node.reply_hint > 0;
        if self.expanded.remove(id) {
            return Some(Expand::Collapsed);
        }
        self.expanded.insert(id.to_string());
        if needs_fetch {
            Some(Expand::NeedsReplies)
        } else {
            Some(Expand::Expanded)
        }
    }

    /// Unlinks `id` and its replies. The subtree can be put back with
    /// [`CommentTree::reattach`] or dropped with [`CommentTree::forget`].
    pub fn detach(&mut self, id: &str) -> Option<Detached> {
        let node_id = *self.index.get(id)?;
        let parent = self.node_at(node_id)?.parent;
        let position = self.unlink(node_id)?;
        let mut subtree = Vec::new();
        self.collect_subtree(node_id, &mut subtree);
        for &member in &subtree {
            if let Some(node) = self.node_at(member) {
                let key = node.comment.id.clone();
                self.index.remove(&key);
            }
        }
        Some(Detached {
            epoch: self.epoch,
            root: node_id,
            parent,
            position,
            size: subtree.len(),
        })
    }

    /// Puts a detached subtree back where it was. Fails when the tree was
    /// reloaded since, or when the parent or the ids are gone or reused.
    pub fn reattach(&mut self, detached: Detached) -> bool {
        if detached.epoch != self.epoch || self.node_at(detached.root).is_none() {
            return false;
        }
        let mut subtree = Vec::new();
        self.collect_subtree(detached.root, &mut subtree);
        let clash = subtree.iter().any(|&member| {
            self.node_at(member)
                .is_some_and(|node| self.index.contains_key(&node.comment.id))
        });
        if clash {
            return false;
        }
        let siblings = match detached.parent {
            Some(parent) => match self.node_at_mut(parent) {
                Some(node) => &mut node.children,
                None => return false,
            },
            None => &mut self.roots,
        };
        let position = detached.position.min(siblings.len());
        siblings.insert(position, detached.root);
        for member in subtree {
            if let Some(node) = self.node_at(member) {
                let key = node.comment.id.clone();
                self.index.insert(key, member);
            }
        }
        true
    }

    pub fn forget(&mut self, detached: Detached) {
        if detached.epoch == self.epoch {
            self.free_subtree(detached.root);
        }
    }

    /// Pre-order walk over roots and the replies of expanded nodes.
    pub fn visible_rows(&self) -> Vec<Row<'_>> {
        let mut rows = Vec::new();
        let mut stack: Vec<(NodeId, usize)> =
            self.roots.iter().rev().map(|&id| (id, 0)).collect();
        while let Some((node_id, depth)) = stack.pop() {
            let Some(node) = self.node_at(node_id) else {
                continue;
            };
            let expanded = self.expanded.contains(&node.comment.id);
            rows.push(Row {
                comment: &node.comment,
                depth,
                reply_count: self.reply_count(&node.comment.id),
                expanded,
                loading: self.loading.contains(&node.comment.id),
                send: node.send,
            });
            if expanded {
                for &child in node.children.iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
        }
        rows
    }

    /// Rebuilds the nested comment structure. Materialized reply lists are
    /// emitted as `detailed_replies` and their counts derived from them.
    pub fn to_comments(&self) -> Vec<Comment> {
        self.roots
            .iter()
            .filter_map(|&id| self.build_comment(id))
            .collect()
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            roots: self.to_comments(),
            expanded: self.expanded.clone(),
        }
    }

    /// Restores a snapshot. Comments that were still being sent when the
    /// snapshot was taken come back as failed, since nobody is waiting for
    /// their result any more.
    pub fn restore(&mut self, snapshot: TreeSnapshot) {
        self.nodes.clear();
        self.roots.clear();
        self.index.clear();
        self.loading.clear();
        self.epoch += 1;
        for comment in snapshot.roots {
            let id = self.insert_server(comment, None);
            self.roots.push(id);
        }
        for node in self.nodes.iter_mut().flatten() {
            if node.comment.is_temporary() {
                node.send = SendState::Failed;
            }
        }
        self.expanded = snapshot.expanded;
    }

    fn build_comment(&self, node_id: NodeId) -> Option<Comment> {
        let node = self.node_at(node_id)?;
        let mut comment = node.comment.clone();
        comment.reply_count = Some(self.reply_count(&comment.id));
        comment.detailed_replies = if node.replies_loaded {
            Some(
                node.children
                    .iter()
                    .filter_map(|&child| self.build_comment(child))
                    .collect(),
            )
        } else {
            None
        };
        Some(comment)
    }

    fn insert_server(&mut self, mut comment: Comment, parent: Option<NodeId>) -> NodeId {
        let replies = comment.detailed_replies.take();
        let reply_hint = comment.reply_count.unwrap_or(0);
        let node_id = self.push_node(Node {
            comment,
            parent,
            children: Vec::new(),
            replies_loaded: replies.is_some(),
            reply_hint,
            send: SendState::Confirmed,
        });
        if let Some(replies) = replies {
            let children: Vec<NodeId> = replies
                .into_iter()
                .map(|reply| self.insert_server(reply, Some(node_id)))
                .collect();
            if let Some(node) = self.node_at_mut(node_id) {
                node.children = children;
            }
        }
        node_id
    }

    // Takes the server's copy of a comment that is already in the tree.
    fn refresh_node(&mut self, node_id: NodeId, parent: NodeId, mut comment: Comment) {
        let nested = comment.detailed_replies.take();
        let id = comment.id.clone();
        if let Some(node) = self.node_at_mut(node_id) {
            node.reply_hint = comment.reply_count.unwrap_or(node.reply_hint);
            node.comment = comment;
            node.parent = Some(parent);
            node.send = SendState::Confirmed;
        }
        if let Some(nested) = nested {
            self.set_replies(&id, nested);
        }
    }

    fn holds_unsent(&self, node_id: NodeId) -> bool {
        let mut subtree = Vec::new();
        self.collect_subtree(node_id, &mut subtree);
        subtree.into_iter().any(|member| {
            self.node_at(member)
                .is_some_and(|node| node.send != SendState::Confirmed)
        })
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.index.insert(node.comment.id.clone(), id);
        self.nodes.push(Some(node));
        id
    }

    // Removes `node_id` from its parent's list and returns its old position.
    fn unlink(&mut self, node_id: NodeId) -> Option<usize> {
        let parent = self.node_at(node_id)?.parent;
        let siblings = match parent {
            Some(parent) => &mut self.node_at_mut(parent)?.children,
            None => &mut self.roots,
        };
        let position = siblings.iter().position(|&id| id == node_id)?;
        siblings.remove(position);
        Some(position)
    }

    fn collect_subtree(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.node_at(id) {
                out.push(id);
                stack.extend(node.children.iter().copied());
            }
        }
    }

    fn free_subtree(&mut self, node_id: NodeId) {
        let mut subtree = Vec::new();
        self.collect_subtree(node_id, &mut subtree);
        for member in subtree {
            if let Some(node) = self.nodes.get_mut(member).and_then(Option::take) {
                if self.index.get(&node.comment.id) == Some(&member) {
                    self.index.remove(&node.comment.id);
                }
                self.expanded.remove(&node.comment.id);
                self.loading.remove(&node.comment.id);
            }
        }
    }

    fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).and_then(|&node_id| self.node_at(node_id))
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let node_id = *self.index.get(id)?;
        self.node_at_mut(node_id)
    }

    fn node_at(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(node_id).and_then(Option::as_ref)
    }

    fn node_at_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node_id).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, parent: Option<&str>, replies: Option<u32>) -> Comment {
        Comment {
            id: id.into(),
            review_id: "r1".into(),
            parent_comment_id: parent.map(str::to_string),
            profile_id: "p1".into(),
            username: Some("ana".into()),
            content: format!("body of {id}"),
            created_date: String::new(),
            last_updated_date: String::new(),
            reply_count: replies,
            detailed_replies: None,
        }
    }

    #[test]
    fn nested_replies_land_at_the_right_depth() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(1)), comment("Z", None, None)]);
        assert!(tree.set_replies("A", vec![comment("B", Some("A"), Some(1))]));
        assert!(tree.set_replies("B", vec![comment("C", Some("B"), Some(1))]));
        assert!(tree.set_replies("C", vec![comment("D", Some("C"), None)]));

        let comments = tree.to_comments();
        let a = &comments[0];
        let b = &a.detailed_replies.as_ref().unwrap()[0];
        let c = &b.detailed_replies.as_ref().unwrap()[0];
        assert_eq!(c.id, "C");
        assert_eq!(c.detailed_replies.as_ref().unwrap()[0].id, "D");
        assert_eq!(tree.depth("D"), Some(3));
        assert_eq!(tree.parent_of("D"), Some("C"));
        assert!(comments[1].detailed_replies.is_none());
    }

    #[test]
    fn unknown_parent_is_reported() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, None)]);
        assert!(!tree.set_replies("missing", vec![comment("B", Some("missing"), None)]));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn reply_count_follows_materialized_list() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(5))]);
        assert_eq!(tree.reply_count("A"), 5);

        tree.set_replies("A", vec![comment("B", Some("A"), None)]);
        assert_eq!(tree.reply_count("A"), 1);
        assert_eq!(tree.to_comments()[0].reply_count, Some(1));

        let mut nested = comment("X", None, Some(9));
        nested.detailed_replies = Some(vec![comment("Y", Some("X"), None)]);
        tree.replace_roots(vec![nested]);
        assert_eq!(tree.reply_count("X"), 1);
    }

    #[test]
    fn optimistic_reply_is_visible_and_expands_parent() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(0))]);
        assert!(!tree.is_expanded("A"));

        tree.insert_optimistic(comment("temp-1-1", Some("A"), None))
            .unwrap();
        assert!(tree.is_expanded("A"));
        let rows = tree.visible_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].comment.id, "temp-1-1");
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[1].send, SendState::Sending);
    }

    #[test]
    fn optimistic_reply_to_unknown_parent_is_rejected() {
        let mut tree = CommentTree::new();
        assert!(tree
            .insert_optimistic(comment("temp-1-1", Some("nope"), None))
            .is_none());
    }

    #[test]
    fn refreshed_replies_keep_pending_siblings_last() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(1))]);
        tree.set_replies("A", vec![comment("B", Some("A"), None)]);
        tree.insert_optimistic(comment("temp-1-1", Some("A"), None));
        tree.insert_optimistic(comment("temp-1-2", Some("A"), None));
        tree.confirm("temp-1-1", comment("S1", Some("A"), None));

        tree.set_replies(
            "A",
            vec![comment("B", Some("A"), None), comment("S1", Some("A"), None)],
        );
        assert_eq!(tree.child_ids("A"), vec!["B", "S1", "temp-1-2"]);
    }

    #[test]
    fn confirm_swaps_temp_in_place() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, None)]);
        tree.insert_optimistic(comment("temp-1-1", None, None));
        tree.replace_roots(vec![comment("A", None, None), comment("B", None, None)]);
        assert_eq!(tree.root_ids(), vec!["A", "B", "temp-1-1"]);

        assert!(tree.confirm("temp-1-1", comment("C", None, None)));
        assert_eq!(tree.root_ids(), vec!["A", "B", "C"]);
        assert!(!tree.contains("temp-1-1"));
        assert_eq!(tree.send_state("C"), Some(SendState::Confirmed));
    }

    #[test]
    fn toggle_expand_requests_unfetched_replies() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(2)), comment("B", None, Some(0))]);
        assert_eq!(tree.toggle_expand("A"), Some(Expand::NeedsReplies));
        assert_eq!(tree.toggle_expand("A"), Some(Expand::Collapsed));
        assert_eq!(tree.toggle_expand("B"), Some(Expand::Expanded));
        assert_eq!(tree.toggle_expand("missing"), None);
    }

    #[test]
    fn detach_and_reattach_restore_position() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(2))]);
        tree.set_replies(
            "A",
            vec![comment("B", Some("A"), None), comment("C", Some("A"), None)],
        );
        tree.set_replies("B", vec![comment("D", Some("B"), None)]);

        let detached = tree.detach("B").unwrap();
        assert_eq!(detached.size(), 2);
        assert!(!tree.contains("D"));
        assert_eq!(tree.reply_count("A"), 1);

        assert!(tree.reattach(detached));
        assert_eq!(tree.child_ids("A"), vec!["B", "C"]);
        assert!(tree.contains("D"));
    }

    #[test]
    fn reattach_after_reload_is_refused() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, None)]);
        let detached = tree.detach("A").unwrap();
        tree.replace_roots(vec![comment("Q", None, None)]);
        assert!(!tree.reattach(detached));
        assert_eq!(tree.root_ids(), vec!["Q"]);
    }

    #[test]
    fn refreshing_a_parent_keeps_deeper_replies_and_drafts() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(1))]);
        tree.set_replies("A", vec![comment("B", Some("A"), Some(1))]);
        tree.set_replies("B", vec![comment("C", Some("B"), None)]);
        tree.toggle_expand("A");
        tree.toggle_expand("B");
        tree.insert_optimistic(comment("temp-1-1", Some("B"), None));
        tree.set_send_state("temp-1-1", SendState::Failed);

        let mut updated = comment("B", Some("A"), Some(2));
        updated.content = "edited elsewhere".into();
        assert!(tree.set_replies("A", vec![updated, comment("S", Some("A"), None)]));

        assert_eq!(tree.child_ids("A"), vec!["B", "S"]);
        assert_eq!(tree.child_ids("B"), vec!["C", "temp-1-1"]);
        assert_eq!(tree.send_state("temp-1-1"), Some(SendState::Failed));
        assert!(tree.is_expanded("B"));
        assert!(tree.replies_loaded("B"));
        assert_eq!(tree.get("B").unwrap().content, "edited elsewhere");
        assert_eq!(tree.depth("temp-1-1"), Some(2));
    }

    #[test]
    fn dropped_reply_with_a_sending_draft_is_kept() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(2))]);
        tree.set_replies(
            "A",
            vec![comment("B", Some("A"), None), comment("D", Some("A"), None)],
        );
        tree.insert_optimistic(comment("temp-1-1", Some("B"), None));

        tree.set_replies("A", vec![comment("S", Some("A"), None)]);
        assert_eq!(tree.child_ids("A"), vec!["S", "B"]);
        assert!(!tree.contains("D"));
        assert!(tree.confirm("temp-1-1", comment("R", Some("B"), None)));
        assert_eq!(tree.parent_of("R"), Some("B"));
    }

    #[test]
    fn snapshot_round_trip_marks_in_flight_as_failed() {
        let mut tree = CommentTree::new();
        tree.replace_roots(vec![comment("A", None, Some(1))]);
        tree.set_replies("A", vec![comment("B", Some("A"), None)]);
        tree.insert_optimistic(comment("temp-1-1", Some("A"), None));

        let snapshot = tree.snapshot();
        let mut restored = CommentTree::new();
        restored.restore(snapshot);
        assert_eq!(restored.child_ids("A"), vec!["B", "temp-1-1"]);
        assert!(restored.is_expanded("A"));
        assert_eq!(restored.send_state("temp-1-1"), Some(SendState::Failed));
        assert_eq!(restored.send_state("B"), Some(SendState::Confirmed));
    }
}
