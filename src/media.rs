use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::api::MIN_SEARCH_LEN;
use crate::config::MediaConfig;
use crate::data::{MediaService, ReviewService};
use crate::events::{AppEvent, Bus};
use crate::model::{
    CreateReviewRequest, CreatedReview, Media, MediaFilters, MediaMainPageReviewInfo, MediaType,
    PageResult, ReviewDetail, SearchResults,
};
use crate::pager::{Pager, Ticket};
use crate::session::{SessionError, Viewer};
use crate::task::{self, CancelToken};

const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";
const IGDB_IMAGE_BASE: &str = "https://images.igdb.com/igdb/image/upload/t_cover_big";
const GOOGLE_BOOKS_COVER: &str = "https://books.google.com/books/content";

/// Cover art location for a title, by the catalogue each media type comes
/// from.
pub fn cover_image_url(media: &Media) -> Option<String> {
    cover_url(media.media_type, &media.cached_image_path)
}

pub fn cover_url(media_type: MediaType, image_path: &str) -> Option<String> {
    let path = image_path.trim();
    if path.is_empty() {
        return None;
    }
    Some(match media_type {
        MediaType::Film => format!("{TMDB_IMAGE_BASE}{path}"),
        MediaType::Game => format!("{IGDB_IMAGE_BASE}{path}"),
        MediaType::Book => {
            format!("{GOOGLE_BOOKS_COVER}?id={path}&printsec=frontcover&img=1&zoom=1")
        }
    })
}

/// Whether `query` is long enough to be sent to the server.
pub fn is_searchable(query: &str) -> bool {
    query.trim().chars().count() >= MIN_SEARCH_LEN
}

enum MediaResponse {
    Page {
        ticket: Ticket,
        result: Result<PageResult<Media>>,
    },
    Search {
        request_id: u64,
        result: Result<SearchResults>,
    },
    ReviewInfo {
        media_id: String,
        result: Result<MediaMainPageReviewInfo>,
    },
    Posted {
        media: Media,
        request: CreateReviewRequest,
        result: Result<CreatedReview>,
    },
}

/// A review whose post failed, handed back so it can be edited and sent again.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewDraft {
    pub media: Media,
    pub content: String,
    pub rating: u8,
}

/// Browse page for one media type: filtered paging, the debounced search
/// box and review submission.
pub struct MediaBrowser {
    media: Arc<dyn MediaService>,
    reviews: Arc<dyn ReviewService>,
    viewer: Option<Viewer>,
    bus: Bus<AppEvent>,
    media_type: MediaType,
    filters: MediaFilters,
    draft_query: String,
    edited_at: Option<Instant>,
    debounce: Duration,
    pager: Pager<Media>,
    search: SearchResults,
    search_pending: Option<u64>,
    review_info: Option<(String, MediaMainPageReviewInfo)>,
    posting: bool,
    failed_post: Option<ReviewDraft>,
    token: CancelToken,
    response_tx: Sender<MediaResponse>,
    response_rx: Receiver<MediaResponse>,
    next_request_id: u64,
    last_error: Option<String>,
}

impl MediaBrowser {
    pub fn new(
        media: Arc<dyn MediaService>,
        reviews: Arc<dyn ReviewService>,
        viewer: Option<Viewer>,
        cfg: &MediaConfig,
        bus: &Bus<AppEvent>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            media,
            reviews,
            viewer,
            bus: bus.clone(),
            media_type: MediaType::default(),
            filters: MediaFilters::default(),
            draft_query: String::new(),
            edited_at: None,
            debounce: cfg.search_debounce,
            pager: Pager::new(cfg.page_size),
            search: SearchResults::default(),
            search_pending: None,
            review_info: None,
            posting: false,
            failed_post: None,
            token: CancelToken::new(),
            response_tx,
            response_rx,
            next_request_id: 1,
            last_error: None,
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn filters(&self) -> &MediaFilters {
        &self.filters
    }

    pub fn draft_query(&self) -> &str {
        &self.draft_query
    }

    pub fn items(&self) -> &[Media] {
        self.pager.items()
    }

    pub fn pager(&self) -> &Pager<Media> {
        &self.pager
    }

    pub fn is_loading(&self) -> bool {
        self.pager.is_loading()
    }

    pub fn search_results(&self) -> &SearchResults {
        &self.search
    }

    pub fn is_searching(&self) -> bool {
        self.search_pending.is_some()
    }

    pub fn review_info(&self, media_id: &str) -> Option<&MediaMainPageReviewInfo> {
        self.review_info
            .as_ref()
            .filter(|(id, _)| id == media_id)
            .map(|(_, info)| info)
    }

    pub fn is_posting(&self) -> bool {
        self.posting
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error
            .as_deref()
            .or_else(|| self.pager.last_error())
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// First page for the current type and filters.
    pub fn activate(&mut self) -> bool {
        self.fetch_next_page()
    }

    pub fn set_media_type(&mut self, media_type: MediaType) -> bool {
        if media_type == self.media_type {
            return false;
        }
        self.media_type = media_type;
        self.reload()
    }

    /// Year, genre and sort order. Any change starts over from page one.
    pub fn set_filters(&mut self, year: &str, genre: &str, sort_by: &str) -> bool {
        let (year, genre, sort_by) = (year.trim(), genre.trim(), sort_by.trim());
        if self.filters.year == year && self.filters.genre == genre && self.filters.sort_by == sort_by
        {
            return false;
        }
        self.filters.year = year.to_string();
        self.filters.genre = genre.to_string();
        self.filters.sort_by = sort_by.to_string();
        self.reload()
    }

    /// Records search box input. Nothing is requested until `tick` finds the
    /// debounce window elapsed.
    pub fn set_query(&mut self, text: &str, now: Instant) {
        if text == self.draft_query {
            return;
        }
        self.draft_query = text.to_string();
        self.edited_at = Some(now);
    }

    pub fn due(&self, now: Instant) -> bool {
        self.edited_at
            .is_some_and(|edited| now.saturating_duration_since(edited) >= self.debounce)
    }

    /// Applies a settled search box: the browse list is re-filtered and the
    /// global search runs. Text shorter than two characters clears both
    /// instead of reaching the server.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.due(now) {
            return false;
        }
        self.edited_at = None;
        let query = self.draft_query.trim();
        let applied = if is_searchable(query) { query } else { "" };
        let changed = applied != self.filters.query;
        self.filters.query = applied.to_string();
        self.search_media_and_users();
        if changed {
            self.reload();
        }
        true
    }

    fn search_media_and_users(&mut self) {
        if !is_searchable(&self.filters.query) {
            self.search = SearchResults::default();
            self.search_pending = None;
            return;
        }
        let request_id = self.next_request_id();
        self.search_pending = Some(request_id);
        let media = self.media.clone();
        let query = self.filters.query.clone();
        task::spawn(&self.token, &self.response_tx, move || MediaResponse::Search {
            request_id,
            result: media.search(&query),
        });
    }

    pub fn fetch_next_page(&mut self) -> bool {
        let Some(ticket) = self.pager.begin_fetch() else {
            return false;
        };
        let media = self.media.clone();
        let media_type = self.media_type;
        let filters = self.filters.clone();
        let page_size = self.pager.page_size();
        tracing::debug!(%media_type, page = ticket.page, "media: requesting page");
        task::spawn(&self.token, &self.response_tx, move || MediaResponse::Page {
            ticket,
            result: media.media_page(media_type, &filters, ticket.page, page_size),
        });
        true
    }

    pub fn on_last_item_visible(&mut self) -> bool {
        self.pager.advance_page() && self.fetch_next_page()
    }

    pub fn resume(&mut self) -> bool {
        self.pager.resume() && self.fetch_next_page()
    }

    fn reload(&mut self) -> bool {
        self.pager.reset();
        self.fetch_next_page()
    }

    /// Rating chart and review lists for one title.
    pub fn load_review_info(&mut self, media_id: &str) {
        let media = self.media.clone();
        let media_id = media_id.to_string();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = media.review_info(&media_id);
            MediaResponse::ReviewInfo { media_id, result }
        });
    }

    /// Posts a review. Success is announced on the bus so open profile views
    /// can show it.
    pub fn submit_review(&mut self, media: &Media, content: &str, rating: u8) -> Result<()> {
        let Some(viewer) = self.viewer.clone() else {
            bail!(SessionError::NotLoggedIn);
        };
        let content = content.trim();
        if content.is_empty() {
            bail!("review text is empty");
        }
        if !(1..=5).contains(&rating) {
            bail!("rating must be between 1 and 5");
        }
        if self.posting {
            bail!("a review is already being posted");
        }
        self.posting = true;
        let request = CreateReviewRequest {
            media_id: media.id.clone(),
            content: content.to_string(),
            rating,
        };
        let reviews = self.reviews.clone();
        let media = media.clone();
        task::spawn(&self.token, &self.response_tx, move || {
            let result = reviews.add_review(&viewer.profile_id, &request);
            MediaResponse::Posted {
                media,
                request,
                result,
            }
        });
        Ok(())
    }

    /// The last review that could not be posted, if nobody picked it up yet.
    pub fn take_failed_post(&mut self) -> Option<ReviewDraft> {
        self.failed_post.take()
    }

    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            if self.token.is_cancelled() {
                continue;
            }
            changed |= self.handle_response(message);
        }
        changed
    }

    fn handle_response(&mut self, message: MediaResponse) -> bool {
        match message {
            MediaResponse::Page { ticket, result } => {
                if let Err(err) = &result {
                    tracing::warn!(page = ticket.page, error = %format!("{err:#}"), "media: page failed");
                }
                self.pager.finish_fetch(ticket, result)
            }
            MediaResponse::Search { request_id, result } => {
                if self.search_pending != Some(request_id) {
                    return false;
                }
                self.search_pending = None;
                match result {
                    Ok(results) => self.search = results,
                    Err(err) => self.fail("search", err),
                }
                true
            }
            MediaResponse::ReviewInfo { media_id, result } => match result {
                Ok(info) => {
                    self.review_info = Some((media_id, info));
                    true
                }
                Err(err) => {
                    self.fail("load reviews", err);
                    true
                }
            },
            MediaResponse::Posted {
                media,
                request,
                result,
            } => {
                self.posting = false;
                match result {
                    Ok(created) => {
                        match created.id {
                            Some(id) => {
                                let posted = self.posted_review(id, &media, &request);
                                let delivered = self.bus.publish(AppEvent::ReviewPosted(posted));
                                tracing::debug!(delivered, "media: review posted");
                            }
                            None => {
                                tracing::debug!(media = %media.id, "media: review posted without id");
                            }
                        }
                        self.last_error = None;
                    }
                    Err(err) => {
                        self.fail("post review", err);
                        self.failed_post = Some(ReviewDraft {
                            media,
                            content: request.content,
                            rating: request.rating,
                        });
                    }
                }
                true
            }
        }
    }

    fn posted_review(&self, id: String, media: &Media, request: &CreateReviewRequest) -> ReviewDetail {
        let now = Utc::now().to_rfc3339();
        let (profile_id, username) = self
            .viewer
            .as_ref()
            .map(|viewer| (viewer.profile_id.clone(), Some(viewer.username.clone())))
            .unwrap_or_default();
        ReviewDetail {
            id,
            content: request.content.clone(),
            rating: f32::from(request.rating),
            profile_id,
            username,
            media_id: media.id.clone(),
            created_date: now.clone(),
            last_updated_date: now,
            media_title: media.title.clone(),
            media_type: media.media_type.as_str().to_string(),
            media_cached_image_path: media.cached_image_path.clone(),
            media_creator: media.creator().to_string(),
            ..ReviewDetail::default()
        }
    }

    fn fail(&mut self, action: &str, err: anyhow::Error) {
        tracing::warn!(error = %format!("{err:#}"), "media: {action} failed");
        self.last_error = Some(format!("Could not {action}: {err:#}"));
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

impl Drop for MediaBrowser {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
