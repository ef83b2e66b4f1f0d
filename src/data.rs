use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use crate::api;
use crate::feed::FeedKind;
use crate::model::{
    Comment, CreateCommentRequest, CreateReviewRequest, CreatedReview, FeedItem, Follow,
    LoginRequest, LoginResponse, Media, MediaFilters, MediaMainPageReviewInfo, MediaType,
    PageResult, Profile, RegisterRequest, Review, ReviewDetail, ReviewRef, SearchResults,
    UserIds, UserSummary,
};

pub trait AuthService: Send + Sync {
    fn login(&self, request: &LoginRequest) -> Result<LoginResponse>;
    fn register(&self, request: &RegisterRequest) -> Result<()>;
}

pub trait CommentService: Send + Sync {
    fn top_level_comments(&self, review_id: &str) -> Result<Vec<Comment>>;
    fn replies(&self, parent_comment_id: &str) -> Result<Vec<Comment>>;
    fn add_comment(
        &self,
        profile_id: &str,
        review_id: &str,
        content: &str,
        parent_comment_id: Option<&str>,
    ) -> Result<Comment>;
    fn edit_comment(&self, comment_id: &str, content: &str) -> Result<()>;
    fn delete_comment(&self, comment_id: &str) -> Result<()>;
}

pub trait ReviewService: Send + Sync {
    fn review_detail(&self, review_id: &str) -> Result<ReviewDetail>;
    fn add_review(&self, profile_id: &str, request: &CreateReviewRequest)
        -> Result<CreatedReview>;
    fn delete_review(&self, profile_id: &str, media_id: &str) -> Result<()>;
    fn like(&self, profile_id: &str, review_id: &str) -> Result<()>;
    fn unlike(&self, profile_id: &str, review_id: &str) -> Result<()>;
}

pub trait FeedService: Send + Sync {
    fn load_page(
        &self,
        kind: FeedKind,
        profile_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<FeedItem>>;
    fn media_recommendations(&self, profile_id: &str, media_type: MediaType)
        -> Result<Vec<Media>>;
}

pub trait ProfileService: Send + Sync {
    fn profile(&self, profile_id: &str) -> Result<Profile>;
    fn ids_for_username(&self, username: &str) -> Result<UserIds>;
    fn follow(&self, follower_id: &str, followee_id: &str) -> Result<()>;
    fn unfollow(&self, follower_id: &str, followee_id: &str) -> Result<()>;
}

pub trait MediaService: Send + Sync {
    fn media_page(
        &self,
        media_type: MediaType,
        filters: &MediaFilters,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<Media>>;
    fn search(&self, query: &str) -> Result<SearchResults>;
    fn review_info(&self, media_id: &str) -> Result<MediaMainPageReviewInfo>;
}

/// Every service the UI talks to, bundled for wiring.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn AuthService>,
    pub comments: Arc<dyn CommentService>,
    pub reviews: Arc<dyn ReviewService>,
    pub feed: Arc<dyn FeedService>,
    pub profiles: Arc<dyn ProfileService>,
    pub media: Arc<dyn MediaService>,
}

impl Services {
    pub fn api(client: Arc<api::Client>) -> Self {
        Self {
            auth: Arc::new(ApiAuthService::new(client.clone())),
            comments: Arc::new(ApiCommentService::new(client.clone())),
            reviews: Arc::new(ApiReviewService::new(client.clone())),
            feed: Arc::new(ApiFeedService::new(client.clone())),
            profiles: Arc::new(ApiProfileService::new(client.clone())),
            media: Arc::new(ApiMediaService::new(client)),
        }
    }

    pub fn fixtures(fixtures: Fixtures) -> Self {
        Self {
            auth: Arc::new(FixtureAuthService::new(fixtures.clone())),
            comments: Arc::new(FixtureCommentService::new(fixtures.clone())),
            reviews: Arc::new(FixtureReviewService::new(fixtures.clone())),
            feed: Arc::new(FixtureFeedService::new(fixtures.clone())),
            profiles: Arc::new(FixtureProfileService::new(fixtures.clone())),
            media: Arc::new(FixtureMediaService::new(fixtures)),
        }
    }
}

pub struct ApiAuthService {
    client: Arc<api::Client>,
}

impl ApiAuthService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl AuthService for ApiAuthService {
    fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        self.client.login(request).context("login")
    }

    fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.client.register(request).context("register")
    }
}

pub struct ApiCommentService {
    client: Arc<api::Client>,
}

impl ApiCommentService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl CommentService for ApiCommentService {
    fn top_level_comments(&self, review_id: &str) -> Result<Vec<Comment>> {
        self.client
            .top_level_comments(review_id)
            .context("fetch top-level comments")
    }

    fn replies(&self, parent_comment_id: &str) -> Result<Vec<Comment>> {
        self.client
            .replies(parent_comment_id)
            .context("fetch replies")
    }

    fn add_comment(
        &self,
        profile_id: &str,
        review_id: &str,
        content: &str,
        parent_comment_id: Option<&str>,
    ) -> Result<Comment> {
        let request = CreateCommentRequest {
            content: content.to_string(),
            parent_comment_id: parent_comment_id.map(str::to_string),
        };
        self.client
            .add_comment(profile_id, review_id, &request)
            .context("post comment")
    }

    fn edit_comment(&self, comment_id: &str, content: &str) -> Result<()> {
        self.client
            .edit_comment(comment_id, content)
            .context("edit comment")
    }

    fn delete_comment(&self, comment_id: &str) -> Result<()> {
        self.client
            .delete_comment(comment_id)
            .context("delete comment")
    }
}

pub struct ApiReviewService {
    client: Arc<api::Client>,
}

impl ApiReviewService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ReviewService for ApiReviewService {
    fn review_detail(&self, review_id: &str) -> Result<ReviewDetail> {
        self.client
            .review_detail(review_id)
            .context("fetch review detail")
    }

    fn add_review(
        &self,
        profile_id: &str,
        request: &CreateReviewRequest,
    ) -> Result<CreatedReview> {
        self.client
            .add_review(profile_id, request)
            .context("post review")
    }

    fn delete_review(&self, profile_id: &str, media_id: &str) -> Result<()> {
        self.client
            .delete_review(profile_id, media_id)
            .context("delete review")
    }

    fn like(&self, profile_id: &str, review_id: &str) -> Result<()> {
        self.client.like(profile_id, review_id).context("like review")
    }

    fn unlike(&self, profile_id: &str, review_id: &str) -> Result<()> {
        self.client
            .unlike(profile_id, review_id)
            .context("unlike review")
    }
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn load_page(
        &self,
        kind: FeedKind,
        profile_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<FeedItem>> {
        let mut fetched = match kind {
            FeedKind::Following => self
                .client
                .follower_feed(profile_id, page, page_size)
                .context("fetch follower feed")?,
            FeedKind::ForYou => self
                .client
                .recommendation_feed(profile_id, page, page_size)
                .context("fetch recommendation feed")?,
        };
        // Feed payloads carry counts but not the viewer's own like.
        for item in &mut fetched.result {
            match self.client.has_liked(profile_id, &item.id) {
                Ok(liked) => item.liked_by_me = liked,
                Err(err) => {
                    tracing::debug!(review_id = %item.id, error = %err, "feed: like state unavailable")
                }
            }
        }
        Ok(fetched)
    }

    fn media_recommendations(
        &self,
        profile_id: &str,
        media_type: MediaType,
    ) -> Result<Vec<Media>> {
        self.client
            .media_recommendations(profile_id, media_type)
            .with_context(|| format!("fetch {media_type} recommendations"))
    }
}

pub struct ApiProfileService {
    client: Arc<api::Client>,
}

impl ApiProfileService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ProfileService for ApiProfileService {
    fn profile(&self, profile_id: &str) -> Result<Profile> {
        self.client.profile(profile_id).context("fetch profile")
    }

    fn ids_for_username(&self, username: &str) -> Result<UserIds> {
        self.client
            .fetch_ids_from_username(username)
            .context("resolve username")
    }

    fn follow(&self, follower_id: &str, followee_id: &str) -> Result<()> {
        self.client
            .follow(follower_id, followee_id)
            .context("follow profile")
    }

    fn unfollow(&self, follower_id: &str, followee_id: &str) -> Result<()> {
        self.client
            .unfollow(follower_id, followee_id)
            .context("unfollow profile")
    }
}

pub struct ApiMediaService {
    client: Arc<api::Client>,
}

impl ApiMediaService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl MediaService for ApiMediaService {
    fn media_page(
        &self,
        media_type: MediaType,
        filters: &MediaFilters,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<Media>> {
        self.client
            .media_with_filters(media_type, filters, page, page_size)
            .context("fetch media page")
    }

    fn search(&self, query: &str) -> Result<SearchResults> {
        self.client
            .search_media_and_users(query)
            .context("search media and users")
    }

    fn review_info(&self, media_id: &str) -> Result<MediaMainPageReviewInfo> {
        self.client
            .media_main_page_review_info(media_id)
            .context("fetch media review info")
    }
}

#[derive(Debug, Clone)]
struct FixtureUser {
    username: String,
    user_id: String,
    profile_id: String,
}

#[derive(Debug, Default)]
struct FixtureData {
    users: Vec<FixtureUser>,
    media: Vec<Media>,
    reviews: Vec<ReviewDetail>,
    comments: Vec<Comment>,
    follows: Vec<Follow>,
    likes: HashSet<(String, String)>,
    next_id: u64,
}

impl FixtureData {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn username_for(&self, profile_id: &str) -> Option<String> {
        self.users
            .iter()
            .find(|user| user.profile_id == profile_id)
            .map(|user| user.username.clone())
    }

    fn decorate(&self, review: &ReviewDetail, viewer: &str) -> ReviewDetail {
        let mut review = review.clone();
        review.like_count = self.likes.iter().filter(|(_, r)| *r == review.id).count() as u32;
        review.comment_count = self
            .comments
            .iter()
            .filter(|c| c.review_id == review.id)
            .count() as u32;
        review.liked_by_me = self
            .likes
            .contains(&(viewer.to_string(), review.id.clone()));
        review
    }

    fn with_reply_count(&self, comment: &Comment) -> Comment {
        let mut comment = comment.clone();
        let replies = self
            .comments
            .iter()
            .filter(|c| c.parent_comment_id.as_deref() == Some(comment.id.as_str()))
            .count() as u32;
        comment.reply_count = Some(replies);
        comment.detailed_replies = None;
        comment
    }

    fn subtree_ids(&self, root: &str) -> HashSet<String> {
        let mut ids = HashSet::from([root.to_string()]);
        loop {
            let before = ids.len();
            for comment in &self.comments {
                if let Some(parent) = comment.parent_comment_id.as_deref() {
                    if ids.contains(parent) {
                        ids.insert(comment.id.clone());
                    }
                }
            }
            if ids.len() == before {
                return ids;
            }
        }
    }
}

/// In-memory backend shared by the fixture services. Used by `--demo` and
/// by tests that need a cooperating server.
#[derive(Debug, Clone, Default)]
pub struct Fixtures {
    inner: Arc<Mutex<FixtureData>>,
}

fn page_of<T: Clone>(items: &[T], page: u32, page_size: u32) -> PageResult<T> {
    let size = page_size.max(1) as usize;
    let start = (page.max(1) as usize - 1) * size;
    let result = items.iter().skip(start).take(size).cloned().collect();
    PageResult {
        page,
        page_size,
        total_count: items.len() as u64,
        result,
    }
}

impl Fixtures {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_user(&self, username: &str) -> String {
        let mut data = self.inner.lock();
        if let Some(user) = data.users.iter().find(|u| u.username == username) {
            return user.profile_id.clone();
        }
        let profile_id = format!("profile-{username}");
        data.users.push(FixtureUser {
            username: username.to_string(),
            user_id: format!("user-{username}"),
            profile_id: profile_id.clone(),
        });
        profile_id
    }

    pub fn add_media(&self, media: Media) {
        self.inner.lock().media.push(media);
    }

    /// Adds a review at the head of the feed order.
    pub fn add_review(&self, review: ReviewDetail) {
        self.inner.lock().reviews.insert(0, review);
    }

    pub fn add_comment(&self, comment: Comment) {
        self.inner.lock().comments.push(comment);
    }

    pub fn follow(&self, follower_id: &str, following_id: &str) {
        let mut data = self.inner.lock();
        let exists = data
            .follows
            .iter()
            .any(|f| f.follower_id == follower_id && f.following_id == following_id);
        if !exists {
            data.follows.push(Follow {
                follower_id: follower_id.to_string(),
                following_id: following_id.to_string(),
            });
        }
    }

    pub fn comment_count(&self) -> usize {
        self.inner.lock().comments.len()
    }

    /// A small offline world: three readers, a handful of titles and a
    /// discussion nested a few levels deep.
    pub fn demo() -> Self {
        let fixtures = Self::default();
        let ana = fixtures.add_user("ana");
        let ben = fixtures.add_user("ben");
        let cy = fixtures.add_user("cy");
        fixtures.follow(&ana, &ben);
        fixtures.follow(&ana, &cy);
        fixtures.follow(&ben, &ana);

        let titles = [
            ("m-dune", "Dune", MediaType::Book, "1965-08-01", "Science Fiction", "Frank Herbert"),
            ("m-arrival", "Arrival", MediaType::Film, "2016-11-11", "Drama", "Denis Villeneuve"),
            ("m-hades", "Hades", MediaType::Game, "2020-09-17", "Roguelike", "Supergiant Games"),
            ("m-heat", "Heat", MediaType::Film, "1995-12-15", "Crime", "Michael Mann"),
            ("m-piranesi", "Piranesi", MediaType::Book, "2020-09-15", "Fantasy", "Susanna Clarke"),
            ("m-outer", "Outer Wilds", MediaType::Game, "2019-05-28", "Adventure", "Mobius Digital"),
        ];
        for (id, title, media_type, date, genre, creator) in titles {
            let mut media = Media {
                id: id.into(),
                title: title.into(),
                publish_date: date.into(),
                genre: genre.into(),
                media_type,
                description: format!("{title} ({genre})"),
                ..Media::default()
            };
            match media_type {
                MediaType::Film => media.director = Some(creator.into()),
                MediaType::Book => media.writer = Some(creator.into()),
                MediaType::Game => media.publisher = Some(creator.into()),
            }
            fixtures.add_media(media);
        }

        let now = Utc::now();
        let reviews = [
            ("r-1", &ben, "m-dune", 5.0, "The desert politics still feel current."),
            ("r-2", &cy, "m-arrival", 4.5, "Quiet, patient and devastating in the last act."),
            ("r-3", &ben, "m-hades", 4.0, "Every run teaches you something new."),
            ("r-4", &cy, "m-heat", 4.0, "The diner scene alone is worth it."),
            ("r-5", &ana, "m-piranesi", 5.0, "A house of endless halls and tides."),
            ("r-6", &cy, "m-outer", 5.0, "Go in knowing nothing."),
        ];
        for (idx, (id, author, media_id, rating, content)) in reviews.iter().enumerate().rev() {
            let created = now - ChronoDuration::hours(idx as i64 * 5);
            let data = fixtures.inner.lock();
            let media = data.media.iter().find(|m| m.id == *media_id).cloned();
            let username = data.username_for(author);
            drop(data);
            let media = media.unwrap_or_default();
            fixtures.add_review(ReviewDetail {
                id: (*id).into(),
                content: (*content).into(),
                rating: *rating,
                profile_id: (*author).clone(),
                username,
                media_id: (*media_id).into(),
                created_date: created.to_rfc3339(),
                last_updated_date: created.to_rfc3339(),
                media_title: media.title.clone(),
                media_type: media.media_type.as_str().into(),
                media_creator: media.creator().to_string(),
                ..ReviewDetail::default()
            });
        }

        let thread = [
            ("c-1", None, &ana, "Best thing I've read this year."),
            ("c-2", Some("c-1"), &ben, "The appendices are a trip too."),
            ("c-3", Some("c-2"), &cy, "Nobody reads the appendices."),
            ("c-4", Some("c-3"), &ana, "I do!"),
            ("c-5", None, &cy, "Have you seen the films?"),
        ];
        for (idx, (id, parent, author, content)) in thread.iter().enumerate() {
            let created = now - ChronoDuration::minutes(60 - idx as i64 * 7);
            let username = fixtures.inner.lock().username_for(author);
            fixtures.add_comment(Comment {
                id: (*id).into(),
                review_id: "r-1".into(),
                parent_comment_id: parent.map(str::to_string),
                profile_id: (*author).clone(),
                username,
                content: (*content).into(),
                created_date: created.to_rfc3339(),
                last_updated_date: created.to_rfc3339(),
                reply_count: None,
                detailed_replies: None,
            });
        }
        fixtures
            .inner
            .lock()
            .likes
            .insert((cy.clone(), "r-1".to_string()));
        fixtures
    }
}

macro_rules! fixture_service {
    ($name:ident) => {
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            fixtures: Fixtures,
        }

        impl $name {
            pub fn new(fixtures: Fixtures) -> Self {
                Self { fixtures }
            }
        }
    };
}

fixture_service!(FixtureAuthService);
fixture_service!(FixtureCommentService);
fixture_service!(FixtureReviewService);
fixture_service!(FixtureFeedService);
fixture_service!(FixtureProfileService);
fixture_service!(FixtureMediaService);

impl AuthService for FixtureAuthService {
    fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let profile_id = self.fixtures.add_user(&request.username);
        let data = self.fixtures.inner.lock();
        let user = data
            .users
            .iter()
            .find(|user| user.profile_id == profile_id)
            .ok_or_else(|| anyhow!("fixture user vanished"))?;
        Ok(LoginResponse {
            token: format!("fixture-token-{}", user.username),
            user_id: user.user_id.clone(),
            profile_id,
        })
    }

    fn register(&self, request: &RegisterRequest) -> Result<()> {
        if request.email.trim().is_empty() {
            bail!("email required");
        }
        self.fixtures.add_user(&request.username);
        Ok(())
    }
}

impl CommentService for FixtureCommentService {
    fn top_level_comments(&self, review_id: &str) -> Result<Vec<Comment>> {
        let data = self.fixtures.inner.lock();
        Ok(data
            .comments
            .iter()
            .filter(|c| c.review_id == review_id && c.parent_comment_id.is_none())
            .map(|c| data.with_reply_count(c))
            .collect())
    }

    fn replies(&self, parent_comment_id: &str) -> Result<Vec<Comment>> {
        let data = self.fixtures.inner.lock();
        Ok(data
            .comments
            .iter()
            .filter(|c| c.parent_comment_id.as_deref() == Some(parent_comment_id))
            .map(|c| data.with_reply_count(c))
            .collect())
    }

    fn add_comment(
        &self,
        profile_id: &str,
        review_id: &str,
        content: &str,
        parent_comment_id: Option<&str>,
    ) -> Result<Comment> {
        let mut data = self.fixtures.inner.lock();
        if let Some(parent) = parent_comment_id {
            if !data.comments.iter().any(|c| c.id == parent) {
                bail!("parent comment {parent} not found");
            }
        }
        let now = Utc::now().to_rfc3339();
        let comment = Comment {
            id: data.next_id("c"),
            review_id: review_id.to_string(),
            parent_comment_id: parent_comment_id.map(str::to_string),
            profile_id: profile_id.to_string(),
            username: data.username_for(profile_id),
            content: content.to_string(),
            created_date: now.clone(),
            last_updated_date: now,
            reply_count: Some(0),
            detailed_replies: None,
        };
        data.comments.push(comment.clone());
        Ok(comment)
    }

    fn edit_comment(&self, comment_id: &str, content: &str) -> Result<()> {
        let mut data = self.fixtures.inner.lock();
        let comment = data
            .comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| anyhow!("comment {comment_id} not found"))?;
        comment.content = content.to_string();
        comment.last_updated_date = Utc::now().to_rfc3339();
        Ok(())
    }

    fn delete_comment(&self, comment_id: &str) -> Result<()> {
        let mut data = self.fixtures.inner.lock();
        let doomed = data.subtree_ids(comment_id);
        data.comments.retain(|c| !doomed.contains(&c.id));
        Ok(())
    }
}

impl ReviewService for FixtureReviewService {
    fn review_detail(&self, review_id: &str) -> Result<ReviewDetail> {
        let data = self.fixtures.inner.lock();
        data.reviews
            .iter()
            .find(|r| r.id == review_id)
            .map(|r| data.decorate(r, ""))
            .ok_or_else(|| anyhow!("review {review_id} not found"))
    }

    fn add_review(
        &self,
        profile_id: &str,
        request: &CreateReviewRequest,
    ) -> Result<CreatedReview> {
        let mut data = self.fixtures.inner.lock();
        let media = data
            .media
            .iter()
            .find(|m| m.id == request.media_id)
            .cloned()
            .ok_or_else(|| anyhow!("media {} not found", request.media_id))?;
        let id = data.next_id("r");
        let now = Utc::now().to_rfc3339();
        let username = data.username_for(profile_id);
        data.reviews.insert(
            0,
            ReviewDetail {
                id: id.clone(),
                content: request.content.clone(),
                rating: f32::from(request.rating),
                profile_id: profile_id.to_string(),
                username,
                media_id: media.id.clone(),
                created_date: now.clone(),
                last_updated_date: now,
                media_title: media.title.clone(),
                media_type: media.media_type.as_str().into(),
                media_cached_image_path: media.cached_image_path.clone(),
                media_creator: media.creator().to_string(),
                ..ReviewDetail::default()
            },
        );
        Ok(CreatedReview { id: Some(id) })
    }

    fn delete_review(&self, profile_id: &str, media_id: &str) -> Result<()> {
        let mut data = self.fixtures.inner.lock();
        let before = data.reviews.len();
        data.reviews
            .retain(|r| !(r.profile_id == profile_id && r.media_id == media_id));
        if data.reviews.len() == before {
            bail!("review for {media_id} not found");
        }
        Ok(())
    }

    fn like(&self, profile_id: &str, review_id: &str) -> Result<()> {
        self.fixtures
            .inner
            .lock()
            .likes
            .insert((profile_id.to_string(), review_id.to_string()));
        Ok(())
    }

    fn unlike(&self, profile_id: &str, review_id: &str) -> Result<()> {
        self.fixtures
            .inner
            .lock()
            .likes
            .remove(&(profile_id.to_string(), review_id.to_string()));
        Ok(())
    }
}

impl FeedService for FixtureFeedService {
    fn load_page(
        &self,
        kind: FeedKind,
        profile_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<FeedItem>> {
        let data = self.fixtures.inner.lock();
        let followed: HashSet<&str> = data
            .follows
            .iter()
            .filter(|f| f.follower_id == profile_id)
            .map(|f| f.following_id.as_str())
            .collect();
        let items: Vec<FeedItem> = data
            .reviews
            .iter()
            .filter(|r| match kind {
                FeedKind::Following => followed.contains(r.profile_id.as_str()),
                FeedKind::ForYou => r.profile_id != profile_id,
            })
            .map(|r| data.decorate(r, profile_id))
            .collect();
        Ok(page_of(&items, page, page_size))
    }

    fn media_recommendations(
        &self,
        profile_id: &str,
        media_type: MediaType,
    ) -> Result<Vec<Media>> {
        let data = self.fixtures.inner.lock();
        let reviewed: HashSet<&str> = data
            .reviews
            .iter()
            .filter(|r| r.profile_id == profile_id)
            .map(|r| r.media_id.as_str())
            .collect();
        Ok(data
            .media
            .iter()
            .filter(|m| m.media_type == media_type && !reviewed.contains(m.id.as_str()))
            .cloned()
            .collect())
    }
}

impl ProfileService for FixtureProfileService {
    fn profile(&self, profile_id: &str) -> Result<Profile> {
        let data = self.fixtures.inner.lock();
        let user = data
            .users
            .iter()
            .find(|u| u.profile_id == profile_id)
            .cloned()
            .ok_or_else(|| anyhow!("profile {profile_id} not found"))?;
        let detailed_reviews: Vec<ReviewDetail> = data
            .reviews
            .iter()
            .filter(|r| r.profile_id == profile_id)
            .map(|r| data.decorate(r, profile_id))
            .collect();
        Ok(Profile {
            id: user.profile_id,
            user_id: user.user_id,
            reviews: detailed_reviews
                .iter()
                .map(|r| ReviewRef { id: r.id.clone() })
                .collect(),
            detailed_reviews,
            followers: data
                .follows
                .iter()
                .filter(|f| f.following_id == profile_id)
                .cloned()
                .collect(),
            following: data
                .follows
                .iter()
                .filter(|f| f.follower_id == profile_id)
                .cloned()
                .collect(),
        })
    }

    fn ids_for_username(&self, username: &str) -> Result<UserIds> {
        let data = self.fixtures.inner.lock();
        data.users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .map(|u| UserIds {
                profile_id: u.profile_id.clone(),
                user_id: u.user_id.clone(),
            })
            .ok_or_else(|| api::ApiError::NotFound.into())
    }

    fn follow(&self, follower_id: &str, followee_id: &str) -> Result<()> {
        if follower_id == followee_id {
            bail!("cannot follow yourself");
        }
        self.fixtures.follow(follower_id, followee_id);
        Ok(())
    }

    fn unfollow(&self, follower_id: &str, followee_id: &str) -> Result<()> {
        self.fixtures
            .inner
            .lock()
            .follows
            .retain(|f| !(f.follower_id == follower_id && f.following_id == followee_id));
        Ok(())
    }
}

impl MediaService for FixtureMediaService {
    fn media_page(
        &self,
        media_type: MediaType,
        filters: &MediaFilters,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<Media>> {
        let data = self.fixtures.inner.lock();
        let query = filters.query.trim().to_lowercase();
        let mut items: Vec<Media> = data
            .media
            .iter()
            .filter(|m| m.media_type == media_type)
            .filter(|m| {
                query.chars().count() < api::MIN_SEARCH_LEN
                    || m.title.to_lowercase().contains(&query)
            })
            .filter(|m| filters.year.is_empty() || m.publish_date.starts_with(&filters.year))
            .filter(|m| {
                filters.genre.is_empty()
                    || m.genre.to_lowercase().contains(&filters.genre.to_lowercase())
            })
            .cloned()
            .collect();
        match filters.sort_by.as_str() {
            "title" => items.sort_by(|a, b| a.title.cmp(&b.title)),
            "newest" => items.sort_by(|a, b| b.publish_date.cmp(&a.publish_date)),
            "rating" => items.sort_by(|a, b| b.avg_rating.total_cmp(&a.avg_rating)),
            _ => {}
        }
        Ok(page_of(&items, page, page_size))
    }

    fn search(&self, query: &str) -> Result<SearchResults> {
        let query = query.trim().to_lowercase();
        if query.chars().count() < api::MIN_SEARCH_LEN {
            return Ok(SearchResults::default());
        }
        let data = self.fixtures.inner.lock();
        Ok(SearchResults {
            media: data
                .media
                .iter()
                .filter(|m| m.title.to_lowercase().contains(&query))
                .cloned()
                .collect(),
            users: data
                .users
                .iter()
                .filter(|u| u.username.to_lowercase().contains(&query))
                .map(|u| UserSummary {
                    id: u.profile_id.clone(),
                    username: u.username.clone(),
                })
                .collect(),
        })
    }

    fn review_info(&self, media_id: &str) -> Result<MediaMainPageReviewInfo> {
        let data = self.fixtures.inner.lock();
        let mut info = MediaMainPageReviewInfo::default();
        for review in data.reviews.iter().filter(|r| r.media_id == media_id) {
            let bucket = format!("{}", review.rating.round() as u32);
            *info.rating_chart_info.entry(bucket).or_insert(0) += 1;
            info.recent_reviews.push(Review {
                id: review.id.clone(),
                content: review.content.clone(),
                rating: review.rating,
                profile_id: review.profile_id.clone(),
                username: review.username.clone(),
                media_id: review.media_id.clone(),
                created_date: review.created_date.clone(),
            });
        }
        info.popular_reviews = info.recent_reviews.clone();
        info.popular_reviews
            .sort_by(|a, b| b.rating.total_cmp(&a.rating));
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_feeds_follow_relationships() {
        let services = Services::fixtures(Fixtures::demo());
        let following = services
            .feed
            .load_page(FeedKind::Following, "profile-ana", 1, 10)
            .unwrap();
        assert!(!following.result.is_empty());
        assert!(following
            .result
            .iter()
            .all(|item| item.profile_id != "profile-ana"));

        let page_two = services
            .feed
            .load_page(FeedKind::Following, "profile-ana", 2, 10)
            .unwrap();
        assert!(page_two.result.is_empty());
    }

    #[test]
    fn fixture_comments_track_reply_counts() {
        let fixtures = Fixtures::demo();
        let comments = FixtureCommentService::new(fixtures.clone());
        let top = comments.top_level_comments("r-1").unwrap();
        let first = top.iter().find(|c| c.id == "c-1").unwrap();
        assert_eq!(first.reply_count, Some(1));

        let reply = comments
            .add_comment("profile-ben", "r-1", "me too", Some("c-1"))
            .unwrap();
        assert_eq!(reply.parent_comment_id.as_deref(), Some("c-1"));
        assert_eq!(comments.replies("c-1").unwrap().len(), 2);

        comments.delete_comment("c-1").unwrap();
        assert!(comments.replies("c-2").unwrap().is_empty());
        assert_eq!(fixtures.comment_count(), 1);
    }

    #[test]
    fn media_filters_and_search() {
        let media = FixtureMediaService::new(Fixtures::demo());
        let films = media
            .media_page(MediaType::Film, &MediaFilters::default(), 1, 30)
            .unwrap();
        assert_eq!(films.result.len(), 2);

        let filtered = media
            .media_page(
                MediaType::Film,
                &MediaFilters {
                    year: "1995".into(),
                    ..MediaFilters::default()
                },
                1,
                30,
            )
            .unwrap();
        assert_eq!(filtered.result[0].title, "Heat");

        assert!(media.search("d").unwrap().media.is_empty());
        assert_eq!(media.search("du").unwrap().media[0].title, "Dune");
    }

    #[test]
    fn likes_show_up_on_feed_items() {
        let fixtures = Fixtures::demo();
        let reviews = FixtureReviewService::new(fixtures.clone());
        let feed = FixtureFeedService::new(fixtures);
        reviews.like("profile-ana", "r-2").unwrap();
        let page = feed
            .load_page(FeedKind::ForYou, "profile-ana", 1, 10)
            .unwrap();
        let item = page.result.iter().find(|r| r.id == "r-2").unwrap();
        assert!(item.liked_by_me);
        assert_eq!(item.like_count, 1);
    }
}
