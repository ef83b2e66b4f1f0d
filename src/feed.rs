use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::capsule::{Capsule, DeferredScroll, TabSlots};
use crate::data::{FeedService, ReviewService};
use crate::events::{AppEvent, Bus};
use crate::model::{FeedItem, Media, MediaType, PageResult};
use crate::pager::{Pager, PagerState, Ticket};
use crate::session::Viewer;
use crate::task::{self, CancelToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedKind {
    #[default]
    Following,
    ForYou,
}

impl FeedKind {
    pub const ALL: [FeedKind; 2] = [FeedKind::Following, FeedKind::ForYou];

    pub fn label(&self) -> &'static str {
        match self {
            FeedKind::Following => "Following",
            FeedKind::ForYou => "For You",
        }
    }

    pub fn next(&self) -> FeedKind {
        match self {
            FeedKind::Following => FeedKind::ForYou,
            FeedKind::ForYou => FeedKind::Following,
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the home view needs to come back exactly as it was left.
#[derive(Debug, Clone, Default)]
pub struct HomeState {
    pub active: FeedKind,
    pub pager: PagerState<FeedItem>,
    pub tabs: TabSlots<FeedKind, PagerState<FeedItem>>,
    pub recommendations: HashMap<MediaType, Vec<Media>>,
}

enum FeedResponse {
    Page {
        kind: FeedKind,
        ticket: Ticket,
        result: Result<PageResult<FeedItem>>,
    },
    Like {
        request_id: u64,
        review_id: String,
        result: Result<()>,
    },
    Deleted {
        review_id: String,
        result: Result<()>,
    },
    Recommendations {
        generation: u64,
        media_type: MediaType,
        result: Result<Vec<Media>>,
    },
}

struct PendingLike {
    request_id: u64,
    liked: bool,
    like_count: u32,
}

/// Home view: the follower and recommendation feeds as tabs plus the
/// recommendation sidebar.
pub struct FeedController {
    feed: Arc<dyn FeedService>,
    reviews: Arc<dyn ReviewService>,
    viewer: Viewer,
    active: FeedKind,
    pager: Pager<FeedItem>,
    tabs: TabSlots<FeedKind, PagerState<FeedItem>>,
    scroll: DeferredScroll,
    events: Receiver<AppEvent>,
    token: CancelToken,
    response_tx: Sender<FeedResponse>,
    response_rx: Receiver<FeedResponse>,
    next_request_id: u64,
    pending_likes: HashMap<String, PendingLike>,
    pending_deletes: HashMap<String, (usize, FeedItem)>,
    recommendations: HashMap<MediaType, Vec<Media>>,
    recommendations_pending: HashSet<MediaType>,
    recommendations_generation: u64,
    last_error: Option<String>,
}

impl FeedController {
    pub fn new(
        feed: Arc<dyn FeedService>,
        reviews: Arc<dyn ReviewService>,
        viewer: Viewer,
        page_size: u32,
        bus: &Bus<AppEvent>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            feed,
            reviews,
            viewer,
            active: FeedKind::default(),
            pager: Pager::new(page_size),
            tabs: TabSlots::new(),
            scroll: DeferredScroll::default(),
            events: bus.subscribe(),
            token: CancelToken::new(),
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_likes: HashMap::new(),
            pending_deletes: HashMap::new(),
            recommendations: HashMap::new(),
            recommendations_pending: HashSet::new(),
            recommendations_generation: 0,
            last_error: None,
        }
    }

    pub fn active(&self) -> FeedKind {
        self.active
    }

    pub fn items(&self) -> &[FeedItem] {
        self.pager.items()
    }

    pub fn pager(&self) -> &Pager<FeedItem> {
        &self.pager
    }

    pub fn is_loading(&self) -> bool {
        self.pager.is_loading()
    }

    pub fn has_more(&self) -> bool {
        self.pager.has_more()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error
            .as_deref()
            .or_else(|| self.pager.last_error())
    }

    pub fn recommendations(&self, media_type: MediaType) -> &[Media] {
        self.recommendations
            .get(&media_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn recommendations_loading(&self) -> bool {
        !self.recommendations_pending.is_empty()
    }

    /// Brings the view up. A capsule is installed as-is and replaces the
    /// mount fetch, except for a page that was still loading when it was
    /// captured; that page is requested again. Without a capsule the first
    /// page and the sidebar are requested. Returns whether a page was
    /// requested.
    pub fn activate(&mut self, capsule: Option<Capsule<HomeState>>) -> bool {
        match capsule {
            Some(Capsule {
                state,
                scroll_offset,
            }) => {
                self.active = state.active;
                self.pager.restore(state.pager);
                self.tabs = state.tabs;
                self.recommendations = state.recommendations;
                self.scroll.schedule(scroll_offset);
                self.load_recommendations(false);
                self.fetch_next_page()
            }
            None => {
                let fetched = self.fetch_next_page();
                self.load_recommendations(false);
                fetched
            }
        }
    }

    pub fn capture(&self, scroll_offset: usize) -> Capsule<HomeState> {
        Capsule {
            state: HomeState {
                active: self.active,
                pager: self.pager.state().clone(),
                tabs: self.tabs.clone(),
                recommendations: self.recommendations.clone(),
            },
            scroll_offset,
        }
    }

    /// Scroll offset to apply once `rendered` rows are on screen.
    pub fn take_scroll(&mut self, rendered: usize) -> Option<usize> {
        self.scroll.take_after_render(rendered)
    }

    /// Requests the current page unless it is loading, loaded, or the feed
    /// has ended.
    pub fn fetch_next_page(&mut self) -> bool {
        let Some(ticket) = self.pager.begin_fetch() else {
            return false;
        };
        let feed = self.feed.clone();
        let kind = self.active;
        let profile_id = self.viewer.profile_id.clone();
        let page_size = self.pager.page_size();
        tracing::debug!(feed = %kind, page = ticket.page, "feed: requesting page");
        task::spawn(&self.token, &self.response_tx, move || FeedResponse::Page {
            kind,
            ticket,
            result: feed.load_page(kind, &profile_id, ticket.page, page_size),
        });
        true
    }

    /// The last rendered item came into view.
    pub fn on_last_item_visible(&mut self) -> bool {
        self.pager.advance_page() && self.fetch_next_page()
    }

    /// Saves the outgoing tab and brings up `kind` from its slot, fetching
    /// only when the tab has never been loaded or was interrupted mid-page.
    pub fn switch_tab(&mut self, kind: FeedKind, scroll_offset: usize) -> bool {
        if kind == self.active {
            return false;
        }
        let outgoing = Capsule {
            state: self.pager.state().clone(),
            scroll_offset,
        };
        self.tabs.save(self.active, outgoing);
        self.active = kind;
        self.last_error = None;
        match self.tabs.take(&kind) {
            Some(Capsule {
                state,
                scroll_offset,
            }) => {
                self.pager.restore(state);
                self.scroll.schedule(scroll_offset);
                self.fetch_next_page()
            }
            None => {
                self.pager.reset();
                self.scroll.cancel();
                self.fetch_next_page()
            }
        }
    }

    /// Drops the active feed and loads it from page one.
    pub fn refresh(&mut self) -> bool {
        self.pager.reset();
        self.scroll.cancel();
        self.last_error = None;
        self.fetch_next_page()
    }

    /// Retries the page that stopped the feed.
    pub fn resume(&mut self) -> bool {
        self.pager.resume() && self.fetch_next_page()
    }

    pub fn toggle_like(&mut self, review_id: &str) -> Result<()> {
        let Some(index) = self.pager.position(|item| item.id == review_id) else {
            bail!("review {review_id} is not in this feed");
        };
        let item = &self.pager.items()[index];
        let (liked, like_count) = (item.liked_by_me, item.like_count);
        let request_id = self.next_request_id();
        // Only the state before the first overlapping toggle matters for
        // rollback.
        let entry = self
            .pending_likes
            .entry(review_id.to_string())
            .or_insert(PendingLike {
                request_id,
                liked,
                like_count,
            });
        entry.request_id = request_id;

        let now_liked = !liked;
        self.pager.update_item(
            |item| item.id == review_id,
            |item| {
                item.liked_by_me = now_liked;
                item.like_count = if now_liked {
                    item.like_count + 1
                } else {
                    item.like_count.saturating_sub(1)
                };
            },
        );

        let reviews = self.reviews.clone();
        let profile_id = self.viewer.profile_id.clone();
        let review_id = review_id.to_string();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = if now_liked {
                reviews.like(&profile_id, &review_id)
            } else {
                reviews.unlike(&profile_id, &review_id)
            };
            FeedResponse::Like {
                request_id,
                review_id,
                result,
            }
        });
        Ok(())
    }

    /// Shifts the comment counter of a review after comments were confirmed
    /// elsewhere. Parked tabs are updated too.
    pub fn adjust_comment_count(&mut self, review_id: &str, delta: i64) {
        if delta == 0 {
            return;
        }
        let apply = |item: &mut FeedItem| {
            let count = i64::from(item.comment_count) + delta;
            item.comment_count = count.max(0) as u32;
        };
        self.pager.update_item(|item| item.id == review_id, apply);
        for (_, capsule) in self.tabs.iter_mut() {
            if let Some(item) = capsule
                .state
                .items
                .iter_mut()
                .find(|item| item.id == review_id)
            {
                apply(item);
            }
        }
    }

    /// Removes one of the viewer's reviews right away and puts it back if
    /// the server refuses.
    pub fn delete_review(&mut self, review_id: &str) -> Result<()> {
        let Some(index) = self.pager.position(|item| item.id == review_id) else {
            bail!("review {review_id} is not in this feed");
        };
        if self.pager.items()[index].profile_id != self.viewer.profile_id {
            bail!("only the author can delete this review");
        }
        let Some((index, item)) = self.pager.remove_item(|item| item.id == review_id) else {
            bail!("review {review_id} is not in this feed");
        };
        let reviews = self.reviews.clone();
        let profile_id = self.viewer.profile_id.clone();
        let media_id = item.media_id.clone();
        let review_id = item.id.clone();
        self.pending_deletes
            .insert(review_id.clone(), (index, item));
        task::spawn(&self.token, &self.response_tx, move || {
            let result = reviews.delete_review(&profile_id, &media_id);
            FeedResponse::Deleted { review_id, result }
        });
        Ok(())
    }

    /// Fetches film, book and game picks. Cached per viewer unless `force`.
    pub fn load_recommendations(&mut self, force: bool) {
        if !force && (!self.recommendations.is_empty() || self.recommendations_loading()) {
            return;
        }
        self.recommendations_generation += 1;
        let generation = self.recommendations_generation;
        self.recommendations_pending = MediaType::ALL.into_iter().collect();
        for media_type in MediaType::ALL {
            let feed = self.feed.clone();
            let profile_id = self.viewer.profile_id.clone();
            task::spawn(&self.token, &self.response_tx, move || {
                FeedResponse::Recommendations {
                    generation,
                    media_type,
                    result: feed.media_recommendations(&profile_id, media_type),
                }
            });
        }
    }

    /// Applies finished requests and bus events. Returns whether anything
    /// changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            if self.token.is_cancelled() {
                continue;
            }
            changed |= self.handle_response(message);
        }
        while let Ok(event) = self.events.try_recv() {
            changed |= self.handle_event(event);
        }
        changed
    }

    fn handle_response(&mut self, message: FeedResponse) -> bool {
        match message {
            FeedResponse::Page {
                kind,
                ticket,
                result,
            } => {
                if kind != self.active {
                    return false;
                }
                if let Err(err) = &result {
                    tracing::warn!(feed = %kind, page = ticket.page, error = %format!("{err:#}"), "feed: page failed");
                }
                self.pager.finish_fetch(ticket, result)
            }
            FeedResponse::Like {
                request_id,
                review_id,
                result,
            } => {
                let current = self
                    .pending_likes
                    .get(&review_id)
                    .is_some_and(|pending| pending.request_id == request_id);
                if !current {
                    return false;
                }
                let Some(pending) = self.pending_likes.remove(&review_id) else {
                    return false;
                };
                match result {
                    Ok(()) => false,
                    Err(err) => {
                        self.pager.update_item(
                            |item| item.id == review_id,
                            |item| {
                                item.liked_by_me = pending.liked;
                                item.like_count = pending.like_count;
                            },
                        );
                        self.fail("update like", err);
                        true
                    }
                }
            }
            FeedResponse::Deleted { review_id, result } => {
                let Some((index, item)) = self.pending_deletes.remove(&review_id) else {
                    return false;
                };
                match result {
                    Ok(()) => false,
                    Err(err) => {
                        self.pager.insert_item(index, item);
                        self.fail("delete review", err);
                        true
                    }
                }
            }
            FeedResponse::Recommendations {
                generation,
                media_type,
                result,
            } => {
                if generation != self.recommendations_generation {
                    return false;
                }
                self.recommendations_pending.remove(&media_type);
                match result {
                    Ok(media) => {
                        self.recommendations.insert(media_type, media);
                    }
                    Err(err) => {
                        tracing::warn!(media_type = %media_type, error = %format!("{err:#}"), "feed: recommendations failed");
                    }
                }
                true
            }
        }
    }

    // Feeds are server ordered, so new reviews are not spliced in.
    fn handle_event(&mut self, event: AppEvent) -> bool {
        match event {
            AppEvent::ReviewPosted(_) => false,
            AppEvent::ReviewDeleted { review_id } => {
                let removed = self.pager.remove_item(|item| item.id == review_id).is_some();
                for (_, capsule) in self.tabs.iter_mut() {
                    capsule.state.items.retain(|item| item.id != review_id);
                }
                removed
            }
        }
    }

    fn fail(&mut self, action: &str, err: anyhow::Error) {
        tracing::warn!(error = %format!("{err:#}"), "feed: {action} failed");
        self.last_error = Some(format!("Could not {action}: {err:#}"));
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use anyhow::anyhow;
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;

    use crate::model::{CreateReviewRequest, CreatedReview, ReviewDetail};
    use crate::task::poll_until;

    /// Serves `sizes[page - 1]` items per page, optionally waiting on a gate.
    struct ScriptedFeed {
        sizes: HashMap<FeedKind, Vec<usize>>,
        gate: Option<Receiver<()>>,
        fail_page: Option<u32>,
        calls: Mutex<Vec<(FeedKind, u32)>>,
    }

    impl ScriptedFeed {
        fn new(following: Vec<usize>, for_you: Vec<usize>) -> Self {
            Self {
                sizes: HashMap::from([
                    (FeedKind::Following, following),
                    (FeedKind::ForYou, for_you),
                ]),
                gate: None,
                fail_page: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn page_calls(&self) -> Vec<(FeedKind, u32)> {
            self.calls.lock().clone()
        }
    }

    impl FeedService for ScriptedFeed {
        fn load_page(
            &self,
            kind: FeedKind,
            _profile_id: &str,
            page: u32,
            page_size: u32,
        ) -> Result<PageResult<FeedItem>> {
            self.calls.lock().push((kind, page));
            if let Some(gate) = &self.gate {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            if self.fail_page == Some(page) {
                return Err(anyhow!("gateway timeout"));
            }
            let count = self
                .sizes
                .get(&kind)
                .and_then(|sizes| sizes.get(page as usize - 1))
                .copied()
                .unwrap_or(0);
            Ok(PageResult {
                page,
                page_size,
                total_count: 0,
                result: (0..count)
                    .map(|n| FeedItem {
                        id: format!("{kind}-{page}-{n}"),
                        profile_id: "profile-ben".into(),
                        like_count: 2,
                        comment_count: 1,
                        ..ReviewDetail::default()
                    })
                    .collect(),
            })
        }

        fn media_recommendations(&self, _: &str, media_type: MediaType) -> Result<Vec<Media>> {
            Ok(vec![Media {
                id: format!("pick-{media_type}"),
                media_type,
                ..Media::default()
            }])
        }
    }

    struct Reviews {
        fail: bool,
    }

    impl ReviewService for Reviews {
        fn review_detail(&self, review_id: &str) -> Result<ReviewDetail> {
            Err(anyhow!("no review {review_id}"))
        }
        fn add_review(&self, _: &str, _: &CreateReviewRequest) -> Result<CreatedReview> {
            Err(anyhow!("unsupported"))
        }
        fn delete_review(&self, _: &str, _: &str) -> Result<()> {
            if self.fail {
                Err(anyhow!("refused"))
            } else {
                Ok(())
            }
        }
        fn like(&self, _: &str, _: &str) -> Result<()> {
            if self.fail {
                Err(anyhow!("refused"))
            } else {
                Ok(())
            }
        }
        fn unlike(&self, profile_id: &str, review_id: &str) -> Result<()> {
            self.like(profile_id, review_id)
        }
    }

    fn viewer() -> Viewer {
        Viewer {
            profile_id: "profile-ana".into(),
            username: "ana".into(),
        }
    }

    fn controller(feed: Arc<ScriptedFeed>, fail_writes: bool) -> (FeedController, Bus<AppEvent>) {
        let bus = Bus::new();
        let controller = FeedController::new(
            feed,
            Arc::new(Reviews { fail: fail_writes }),
            viewer(),
            10,
            &bus,
        );
        (controller, bus)
    }

    fn settle(feed: &mut FeedController) {
        poll_until(feed, FeedController::poll, |feed| {
            !feed.is_loading() && !feed.recommendations_loading()
        });
    }

    #[test]
    fn double_fetch_issues_one_request() {
        let (gate_tx, gate_rx) = bounded(4);
        let mut script = ScriptedFeed::new(vec![10], vec![]);
        script.gate = Some(gate_rx);
        let script = Arc::new(script);
        let (mut feed, _bus) = controller(script.clone(), false);

        assert!(feed.fetch_next_page());
        assert!(!feed.fetch_next_page());
        gate_tx.send(()).unwrap();
        poll_until(&mut feed, FeedController::poll, |feed| !feed.is_loading());
        assert_eq!(script.page_calls(), vec![(FeedKind::Following, 1)]);
        assert!(!feed.fetch_next_page());
    }

    #[test]
    fn empty_page_ends_feed() {
        let script = Arc::new(ScriptedFeed::new(vec![10, 10, 0], vec![]));
        let (mut feed, _bus) = controller(script.clone(), false);
        feed.activate(None);
        settle(&mut feed);
        for _ in 0..2 {
            assert!(feed.on_last_item_visible());
            settle(&mut feed);
        }
        assert_eq!(feed.items().len(), 20);
        assert!(!feed.has_more());
        assert!(!feed.on_last_item_visible());
        assert!(!feed.fetch_next_page());
        let pages: Vec<u32> = script.page_calls().into_iter().map(|(_, p)| p).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[test]
    fn capsule_round_trip_skips_mount_fetch() {
        let script = Arc::new(ScriptedFeed::new(vec![10, 10], vec![]));
        let (mut first, bus) = controller(script.clone(), false);
        first.activate(None);
        settle(&mut first);
        first.on_last_item_visible();
        settle(&mut first);
        let capsule = first.capture(14);
        let captured = capsule.state.pager.clone();
        drop(first);
        let calls_before = script.page_calls().len();

        let mut second = FeedController::new(
            script.clone(),
            Arc::new(Reviews { fail: false }),
            viewer(),
            10,
            &bus,
        );
        assert!(!second.activate(Some(capsule)));
        assert_eq!(second.pager().state(), &captured);
        assert_eq!(second.recommendations(MediaType::Game).len(), 1);
        assert_eq!(script.page_calls().len(), calls_before);
        assert_eq!(second.take_scroll(0), None);
        assert_eq!(second.take_scroll(20), Some(14));
    }

    #[test]
    fn capsule_taken_mid_page_requests_that_page_again() {
        let (gate_tx, gate_rx) = bounded(4);
        let mut script = ScriptedFeed::new(vec![10, 10, 10], vec![]);
        script.gate = Some(gate_rx);
        let script = Arc::new(script);
        let (mut first, bus) = controller(script.clone(), false);
        first.activate(None);
        gate_tx.send(()).unwrap();
        settle(&mut first);
        assert!(first.on_last_item_visible());
        assert!(first.is_loading());
        let capsule = first.capture(9);
        assert!(!capsule.state.pager.loaded_pages.contains(&2));
        drop(first);
        // release the abandoned page 2 request
        gate_tx.send(()).unwrap();

        let mut second = FeedController::new(
            script.clone(),
            Arc::new(Reviews { fail: false }),
            viewer(),
            10,
            &bus,
        );
        assert!(second.activate(Some(capsule)));
        gate_tx.send(()).unwrap();
        settle(&mut second);
        assert_eq!(second.items().len(), 20);
        assert_eq!(second.pager().page(), 2);

        assert!(second.on_last_item_visible());
        gate_tx.send(()).unwrap();
        settle(&mut second);
        assert_eq!(second.items().len(), 30);
        let pages: Vec<u32> = script.page_calls().into_iter().map(|(_, p)| p).collect();
        assert_eq!(pages, vec![1, 2, 2, 3]);
    }

    #[test]
    fn tabs_keep_their_own_pages() {
        let script = Arc::new(ScriptedFeed::new(vec![10, 4], vec![3]));
        let (mut feed, _bus) = controller(script.clone(), false);
        feed.activate(None);
        settle(&mut feed);
        feed.on_last_item_visible();
        settle(&mut feed);
        assert_eq!(feed.items().len(), 14);

        assert!(feed.switch_tab(FeedKind::ForYou, 9));
        settle(&mut feed);
        assert_eq!(feed.items().len(), 3);

        assert!(!feed.switch_tab(FeedKind::Following, 0));
        assert_eq!(feed.items().len(), 14);
        assert_eq!(feed.pager().page(), 2);
        assert_eq!(feed.take_scroll(14), Some(9));
        assert_eq!(
            script
                .page_calls()
                .iter()
                .filter(|(kind, _)| *kind == FeedKind::Following)
                .count(),
            2
        );
    }

    #[test]
    fn failed_page_stops_until_resumed() {
        let mut script = ScriptedFeed::new(vec![10, 10], vec![]);
        script.fail_page = Some(2);
        let script = Arc::new(script);
        let (mut feed, _bus) = controller(script, false);
        feed.activate(None);
        settle(&mut feed);
        assert!(feed.on_last_item_visible());
        settle(&mut feed);
        assert!(!feed.has_more());
        assert!(feed.last_error().unwrap().contains("gateway timeout"));
        assert_eq!(feed.items().len(), 10);
        assert!(!feed.on_last_item_visible());
        assert!(feed.resume());
    }

    #[test]
    fn like_is_optimistic_and_reverted_on_failure() {
        let script = Arc::new(ScriptedFeed::new(vec![1], vec![]));
        let (mut feed, _bus) = controller(script, true);
        feed.activate(None);
        settle(&mut feed);
        let id = feed.items()[0].id.clone();

        feed.toggle_like(&id).unwrap();
        assert!(feed.items()[0].liked_by_me);
        assert_eq!(feed.items()[0].like_count, 3);
        poll_until(&mut feed, FeedController::poll, |feed| feed.last_error().is_some());
        assert!(!feed.items()[0].liked_by_me);
        assert_eq!(feed.items()[0].like_count, 2);
    }

    #[test]
    fn comment_counts_follow_confirmed_comments() {
        let script = Arc::new(ScriptedFeed::new(vec![2], vec![]));
        let (mut feed, _bus) = controller(script, false);
        feed.activate(None);
        settle(&mut feed);
        let id = feed.items()[1].id.clone();
        feed.adjust_comment_count(&id, 2);
        assert_eq!(feed.items()[1].comment_count, 3);
        feed.adjust_comment_count(&id, -5);
        assert_eq!(feed.items()[1].comment_count, 0);
    }

    #[test]
    fn bus_deletions_remove_items_and_posts_are_ignored() {
        let script = Arc::new(ScriptedFeed::new(vec![2], vec![]));
        let (mut feed, bus) = controller(script, false);
        feed.activate(None);
        settle(&mut feed);
        let id = feed.items()[0].id.clone();

        bus.publish(AppEvent::ReviewPosted(FeedItem {
            id: "new".into(),
            ..FeedItem::default()
        }));
        bus.publish(AppEvent::ReviewDeleted { review_id: id });
        feed.poll();
        assert_eq!(feed.items().len(), 1);
        assert!(feed.items().iter().all(|item| item.id != "new"));
    }

    #[test]
    fn only_own_reviews_can_be_deleted() {
        let script = Arc::new(ScriptedFeed::new(vec![1], vec![]));
        let (mut feed, _bus) = controller(script, false);
        feed.activate(None);
        settle(&mut feed);
        let id = feed.items()[0].id.clone();
        assert!(feed.delete_review(&id).is_err());
        assert_eq!(feed.items().len(), 1);
    }
}
