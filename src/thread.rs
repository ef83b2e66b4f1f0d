use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::data::{CommentService, ReviewService};
use crate::model::{is_temp_id, temp_id, Comment, ReviewDetail};
use crate::session::{SessionError, Viewer};
use crate::task::{self, CancelToken};
use crate::tree::{CommentTree, Detached, Expand, SendState, TreeSnapshot};

/// Captured state of a thread view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThreadState {
    pub review: Option<ReviewDetail>,
    pub tree: TreeSnapshot,
    /// The top-level list had arrived when the state was captured.
    pub comments_loaded: bool,
}

enum ThreadResponse {
    Review {
        request_id: u64,
        result: Result<ReviewDetail>,
    },
    TopLevel {
        request_id: u64,
        result: Result<Vec<Comment>>,
    },
    Replies {
        request_id: u64,
        parent_id: String,
        result: Result<Vec<Comment>>,
    },
    Created {
        temp_id: String,
        parent_id: Option<String>,
        result: Result<Comment>,
    },
    Edited {
        request_id: u64,
        comment_id: String,
        result: Result<()>,
    },
    Deleted {
        comment_id: String,
        result: Result<()>,
    },
}

/// Owns the comment tree of one review and every request made for it.
/// Results are applied on [`ThreadController::poll`]; dropping the
/// controller cancels whatever is still in flight.
pub struct ThreadController {
    review_id: String,
    viewer: Option<Viewer>,
    comments: Arc<dyn CommentService>,
    reviews: Arc<dyn ReviewService>,
    tree: CommentTree,
    review: Option<ReviewDetail>,
    comments_loaded: bool,
    token: CancelToken,
    response_tx: Sender<ThreadResponse>,
    response_rx: Receiver<ThreadResponse>,
    next_request_id: u64,
    temp_seq: u64,
    review_request: Option<u64>,
    top_level_request: Option<u64>,
    reply_requests: HashMap<String, u64>,
    pending_edits: HashMap<String, (u64, String)>,
    pending_deletes: HashMap<String, Detached>,
    comment_delta: i64,
    last_error: Option<String>,
}

impl ThreadController {
    pub fn new(
        review_id: impl Into<String>,
        viewer: Option<Viewer>,
        comments: Arc<dyn CommentService>,
        reviews: Arc<dyn ReviewService>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            review_id: review_id.into(),
            viewer,
            comments,
            reviews,
            tree: CommentTree::new(),
            review: None,
            comments_loaded: false,
            token: CancelToken::new(),
            response_tx,
            response_rx,
            next_request_id: 1,
            temp_seq: 0,
            review_request: None,
            top_level_request: None,
            reply_requests: HashMap::new(),
            pending_edits: HashMap::new(),
            pending_deletes: HashMap::new(),
            comment_delta: 0,
            last_error: None,
        }
    }

    pub fn review_id(&self) -> &str {
        &self.review_id
    }

    pub fn review(&self) -> Option<&ReviewDetail> {
        self.review.as_ref()
    }

    pub fn tree(&self) -> &CommentTree {
        &self.tree
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn is_loading(&self) -> bool {
        self.top_level_request.is_some() || self.review_request.is_some()
    }

    /// Net change in the review's comment count confirmed by the server
    /// since this thread was opened.
    pub fn comment_delta(&self) -> i64 {
        self.comment_delta
    }

    /// Brings the view up, from a capsule when one is given. Loads that were
    /// still outstanding when the capsule was taken are issued again.
    /// Returns whether requests were issued.
    pub fn activate(&mut self, restored: Option<ThreadState>) -> bool {
        match restored {
            Some(state) => {
                self.review = state.review;
                self.tree.restore(state.tree);
                self.comments_loaded = state.comments_loaded;
                let mut requested = false;
                if self.review.is_none() {
                    self.load_review();
                    requested = true;
                }
                if !self.comments_loaded {
                    self.load_top_level();
                    requested = true;
                }
                for comment_id in self.tree.unfetched_expanded() {
                    requested |= self.load_replies(&comment_id);
                }
                requested
            }
            None => {
                self.load_review();
                self.load_top_level();
                true
            }
        }
    }

    pub fn capture(&self) -> ThreadState {
        ThreadState {
            review: self.review.clone(),
            tree: self.tree.snapshot(),
            comments_loaded: self.comments_loaded,
        }
    }

    /// Cancels everything in flight. Later results are dropped.
    pub fn close(&mut self) {
        self.token.cancel();
    }

    pub fn load_review(&mut self) {
        let request_id = self.next_request_id();
        self.review_request = Some(request_id);
        let reviews = self.reviews.clone();
        let review_id = self.review_id.clone();
        task::spawn(&self.token, &self.response_tx, move || {
            ThreadResponse::Review {
                request_id,
                result: reviews.review_detail(&review_id),
            }
        });
    }

    pub fn load_top_level(&mut self) {
        let request_id = self.next_request_id();
        self.top_level_request = Some(request_id);
        let comments = self.comments.clone();
        let review_id = self.review_id.clone();
        tracing::debug!(review_id = %review_id, request_id, "thread: loading comments");
        task::spawn(&self.token, &self.response_tx, move || {
            ThreadResponse::TopLevel {
                request_id,
                result: comments.top_level_comments(&review_id),
            }
        });
    }

    /// Fetches one level of replies for `comment_id`, wherever it sits.
    pub fn load_replies(&mut self, comment_id: &str) -> bool {
        match self.tree.get(comment_id) {
            Some(comment) if !comment.is_temporary() => {}
            _ => return false,
        }
        let request_id = self.next_request_id();
        self.reply_requests.insert(comment_id.to_string(), request_id);
        self.tree.set_loading(comment_id, true);
        let comments = self.comments.clone();
        let parent_id = comment_id.to_string();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = comments.replies(&parent_id);
            ThreadResponse::Replies {
                request_id,
                parent_id,
                result,
            }
        });
        true
    }

    pub fn toggle_expand(&mut self, comment_id: &str) -> Option<Expand> {
        let outcome = self.tree.toggle_expand(comment_id)?;
        if outcome == Expand::NeedsReplies {
            self.load_replies(comment_id);
        }
        Some(outcome)
    }

    /// Posts a comment or reply. The comment is in the tree under a
    /// temporary id when this returns; the id is handed back.
    pub fn add_comment(&mut self, content: &str, parent_id: Option<&str>) -> Result<String> {
        let Some(viewer) = self.viewer.clone() else {
            bail!(SessionError::NotLoggedIn);
        };
        let content = content.trim();
        if content.is_empty() {
            bail!("comment is empty");
        }
        if let Some(parent_id) = parent_id {
            match self.tree.send_state(parent_id) {
                None => bail!("comment {parent_id} is no longer in this thread"),
                Some(SendState::Confirmed) if !is_temp_id(parent_id) => {}
                Some(_) => bail!("wait for that comment to be posted before replying"),
            }
        }

        self.temp_seq += 1;
        let now = Utc::now();
        let id = temp_id(now, self.temp_seq);
        let comment = Comment {
            id: id.clone(),
            review_id: self.review_id.clone(),
            parent_comment_id: parent_id.map(str::to_string),
            profile_id: viewer.profile_id.clone(),
            username: Some(viewer.username.clone()),
            content: content.to_string(),
            created_date: now.to_rfc3339(),
            last_updated_date: now.to_rfc3339(),
            reply_count: Some(0),
            detailed_replies: None,
        };
        if self.tree.insert_optimistic(comment).is_none() {
            bail!("comment could not be placed");
        }
        self.send_comment(&id);
        Ok(id)
    }

    /// Sends a failed comment again.
    pub fn retry_comment(&mut self, temp_id: &str) -> bool {
        if self.tree.send_state(temp_id) != Some(SendState::Failed) {
            return false;
        }
        self.tree.set_send_state(temp_id, SendState::Sending);
        self.send_comment(temp_id);
        true
    }

    /// Drops a failed comment and hands its text back so it can be edited
    /// and posted again.
    pub fn discard_comment(&mut self, temp_id: &str) -> Option<String> {
        if self.tree.send_state(temp_id) != Some(SendState::Failed) {
            return None;
        }
        let content = self.tree.get(temp_id)?.content.clone();
        let detached = self.tree.detach(temp_id)?;
        self.tree.forget(detached);
        Some(content)
    }

    /// Changes the body of one of the viewer's comments. The old body comes
    /// back if the server refuses.
    pub fn edit_comment(&mut self, comment_id: &str, content: &str) -> Result<()> {
        self.ensure_owned(comment_id)?;
        let content = content.trim();
        if content.is_empty() {
            bail!("comment is empty");
        }
        let Some(previous) = self.tree.set_content(comment_id, content) else {
            bail!("comment {comment_id} is no longer in this thread");
        };
        let request_id = self.next_request_id();
        // Keep the oldest body if edits overlap.
        let original = match self.pending_edits.remove(comment_id) {
            Some((_, original)) => original,
            None => previous,
        };
        self.pending_edits
            .insert(comment_id.to_string(), (request_id, original));

        let comments = self.comments.clone();
        let comment_id = comment_id.to_string();
        let content = content.to_string();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = comments.edit_comment(&comment_id, &content);
            ThreadResponse::Edited {
                request_id,
                comment_id,
                result,
            }
        });
        Ok(())
    }

    /// Removes one of the viewer's comments with its replies. The subtree is
    /// put back if the server refuses.
    pub fn delete_comment(&mut self, comment_id: &str) -> Result<()> {
        self.ensure_owned(comment_id)?;
        let Some(detached) = self.tree.detach(comment_id) else {
            bail!("comment {comment_id} is no longer in this thread");
        };
        self.pending_deletes.insert(comment_id.to_string(), detached);
        let comments = self.comments.clone();
        let comment_id = comment_id.to_string();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = comments.delete_comment(&comment_id);
            ThreadResponse::Deleted { comment_id, result }
        });
        Ok(())
    }

    /// Applies finished requests. Returns whether anything changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            if self.token.is_cancelled() {
                continue;
            }
            self.handle_response(message);
            changed = true;
        }
        changed
    }

    fn handle_response(&mut self, message: ThreadResponse) {
        match message {
            ThreadResponse::Review { request_id, result } => {
                if self.review_request != Some(request_id) {
                    return;
                }
                self.review_request = None;
                match result {
                    Ok(review) => self.review = Some(review),
                    Err(err) => self.fail("load review", err),
                }
            }
            ThreadResponse::TopLevel { request_id, result } => {
                if self.top_level_request != Some(request_id) {
                    return;
                }
                self.top_level_request = None;
                match result {
                    Ok(comments) => {
                        tracing::debug!(count = comments.len(), "thread: comments loaded");
                        self.tree.replace_roots(comments);
                        self.reply_requests.clear();
                        self.comments_loaded = true;
                    }
                    Err(err) => self.fail("load comments", err),
                }
            }
            ThreadResponse::Replies {
                request_id,
                parent_id,
                result,
            } => {
                if self.reply_requests.get(&parent_id) != Some(&request_id) {
                    return;
                }
                self.reply_requests.remove(&parent_id);
                match result {
                    Ok(replies) => {
                        if !self.tree.set_replies(&parent_id, replies) {
                            tracing::debug!(parent_id = %parent_id, "thread: replies for a removed comment");
                        }
                    }
                    Err(err) => {
                        self.tree.set_loading(&parent_id, false);
                        self.fail("load replies", err);
                    }
                }
            }
            ThreadResponse::Created {
                temp_id,
                parent_id,
                result,
            } => match result {
                Ok(comment) => {
                    self.comment_delta += 1;
                    if !self.tree.confirm(&temp_id, comment) {
                        return;
                    }
                    if let Some(parent_id) = parent_id {
                        self.load_replies(&parent_id);
                    }
                }
                Err(err) => {
                    self.tree.set_send_state(&temp_id, SendState::Failed);
                    self.fail("post comment", err);
                }
            },
            ThreadResponse::Edited {
                request_id,
                comment_id,
                result,
            } => {
                let current = matches!(
                    self.pending_edits.get(&comment_id),
                    Some((id, _)) if *id == request_id
                );
                if !current {
                    return;
                }
                let Some((_, original)) = self.pending_edits.remove(&comment_id) else {
                    return;
                };
                if let Err(err) = result {
                    self.tree.set_content(&comment_id, &original);
                    self.fail("edit comment", err);
                }
            }
            ThreadResponse::Deleted { comment_id, result } => {
                let Some(detached) = self.pending_deletes.remove(&comment_id) else {
                    return;
                };
                match result {
                    Ok(()) => {
                        self.comment_delta -= detached.size() as i64;
                        self.tree.forget(detached);
                    }
                    Err(err) => {
                        if !self.tree.reattach(detached) {
                            tracing::debug!(comment_id = %comment_id, "thread: deleted comment could not be restored");
                        }
                        self.fail("delete comment", err);
                    }
                }
            }
        }
    }

    fn send_comment(&mut self, temp_id: &str) {
        let (Some(viewer), Some(comment)) = (self.viewer.clone(), self.tree.get(temp_id).cloned())
        else {
            return;
        };
        let comments = self.comments.clone();
        let review_id = self.review_id.clone();
        let temp_id = temp_id.to_string();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = comments.add_comment(
                &viewer.profile_id,
                &review_id,
                &comment.content,
                comment.parent_comment_id.as_deref(),
            );
            ThreadResponse::Created {
                temp_id,
                parent_id: comment.parent_comment_id,
                result,
            }
        });
    }

    fn ensure_owned(&self, comment_id: &str) -> Result<()> {
        let Some(viewer) = self.viewer.as_ref() else {
            bail!(SessionError::NotLoggedIn);
        };
        let Some(comment) = self.tree.get(comment_id) else {
            bail!("comment {comment_id} is no longer in this thread");
        };
        if comment.is_temporary() {
            bail!("comment is still being sent");
        }
        if comment.profile_id != viewer.profile_id {
            bail!("only the author can change this comment");
        }
        Ok(())
    }

    fn fail(&mut self, action: &str, err: anyhow::Error) {
        tracing::warn!(review_id = %self.review_id, error = %format!("{err:#}"), "thread: {action} failed");
        self.last_error = Some(format!("Could not {action}: {err:#}"));
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

impl Drop for ThreadController {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
