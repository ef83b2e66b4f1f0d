use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::model::{
    Comment, CreateCommentRequest, CreateReviewRequest, CreatedReview, LoginRequest,
    LoginResponse, Media, MediaFilters, MediaMainPageReviewInfo, MediaType, PageResult, Profile,
    RegisterRequest, ReviewDetail, SearchResults, UserIds,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5002/api";

/// Minimum query length the search endpoints are called with.
pub const MIN_SEARCH_LEN: usize = 2;

/// Supplies the bearer credential attached to every request, if any.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Token provider for anonymous use.
pub struct NoToken;

impl TokenProvider for NoToken {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("poplens: unauthorized")]
    Unauthorized,
    #[error("poplens: forbidden")]
    Forbidden,
    #[error("poplens: not found")]
    NotFound,
    #[error("poplens: api error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("poplens: transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("poplens: decode {path}: {message}")]
    Decode { path: String, message: String },
}

impl ApiError {
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NotFound))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    token_provider: Arc<dyn TokenProvider>,
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(token_provider: Arc<dyn TokenProvider>, config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("poplens client user agent required");
        }
        let base = config
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(base.trim_end_matches('/'))
            .with_context(|| format!("poplens: invalid base url {base}"))?;
        if base_url.cannot_be_a_base() {
            bail!("poplens: base url {base} cannot carry paths");
        }
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            token_provider,
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // UserAuthentication

    pub fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        self.send_json(Method::POST, "UserAuthentication", &["Login"], &[], Some(request))
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<()> {
        self.send_unit(Method::POST, "UserAuthentication", &["Register"], Some(request))
    }

    pub fn fetch_ids_from_username(&self, username: &str) -> Result<UserIds> {
        self.get_json("UserAuthentication", &["FetchIdsFromUsername", username], &[])
    }

    // Review

    pub fn review_detail(&self, review_id: &str) -> Result<ReviewDetail> {
        self.get_json("Review", &[review_id, "GetReviewDetail"], &[])
    }

    pub fn add_review(
        &self,
        profile_id: &str,
        request: &CreateReviewRequest,
    ) -> Result<CreatedReview> {
        let value: Value = self.send_json(
            Method::POST,
            "Review",
            &[profile_id, "addReview"],
            &[],
            Some(request),
        )?;
        // Older gateways answer with a bare id string.
        Ok(match value {
            Value::String(id) => CreatedReview { id: Some(id) },
            other => serde_json::from_value(other).unwrap_or_default(),
        })
    }

    pub fn delete_review(&self, profile_id: &str, media_id: &str) -> Result<()> {
        self.send_unit::<()>(
            Method::DELETE,
            "Review",
            &[profile_id, "DeleteReview", media_id],
            None,
        )
    }

    pub fn media_main_page_review_info(&self, media_id: &str) -> Result<MediaMainPageReviewInfo> {
        self.get_json("Review", &["GetMediaMainPageReviewInfo", media_id], &[])
    }

    pub fn like(&self, profile_id: &str, review_id: &str) -> Result<()> {
        self.send_unit::<()>(Method::POST, "Review", &[profile_id, review_id, "Like"], None)
    }

    pub fn unlike(&self, profile_id: &str, review_id: &str) -> Result<()> {
        self.send_unit::<()>(
            Method::DELETE,
            "Review",
            &[profile_id, review_id, "Unlike"],
            None,
        )
    }

    pub fn has_liked(&self, profile_id: &str, review_id: &str) -> Result<bool> {
        self.get_json("Review", &[profile_id, review_id, "HasLiked"], &[])
    }

    pub fn add_comment(
        &self,
        profile_id: &str,
        review_id: &str,
        request: &CreateCommentRequest,
    ) -> Result<Comment> {
        self.send_json(
            Method::POST,
            "Review",
            &[profile_id, review_id, "Comment"],
            &[],
            Some(request),
        )
    }

    pub fn edit_comment(&self, comment_id: &str, content: &str) -> Result<()> {
        self.send_unit(
            Method::PUT,
            "Review",
            &[comment_id, "EditComment"],
            Some(&content),
        )
    }

    pub fn delete_comment(&self, comment_id: &str) -> Result<()> {
        self.send_unit::<()>(
            Method::DELETE,
            "Review",
            &[comment_id, "DeleteComment"],
            None,
        )
    }

    pub fn top_level_comments(&self, review_id: &str) -> Result<Vec<Comment>> {
        self.get_list("Review", &[review_id, "TopLevelComments"])
    }

    pub fn replies(&self, parent_comment_id: &str) -> Result<Vec<Comment>> {
        self.get_list("Review", &[parent_comment_id, "Replies"])
    }

    // Feed

    pub fn follower_feed(
        &self,
        profile_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<ReviewDetail>> {
        self.get_page("Feed", &["GetFollowerFeed", profile_id], page, page_size)
    }

    pub fn recommendation_feed(
        &self,
        profile_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<ReviewDetail>> {
        self.get_page("Feed", &["GetRecommendationFeed", profile_id], page, page_size)
    }

    pub fn media_recommendations(
        &self,
        profile_id: &str,
        media_type: MediaType,
    ) -> Result<Vec<Media>> {
        self.get_list(
            "Feed",
            &["GetMediaRecommendations", profile_id, media_type.as_str()],
        )
    }

    // Profile

    pub fn profile(&self, profile_id: &str) -> Result<Profile> {
        self.get_json("Profile", &[profile_id], &[])
    }

    pub fn follow(&self, follower_id: &str, followee_id: &str) -> Result<()> {
        self.send_unit::<()>(
            Method::POST,
            "Profile",
            &[follower_id, "Follow", followee_id],
            None,
        )
    }

    pub fn unfollow(&self, follower_id: &str, followee_id: &str) -> Result<()> {
        self.send_unit::<()>(
            Method::DELETE,
            "Profile",
            &[follower_id, "Unfollow", followee_id],
            None,
        )
    }

    // Media and search

    pub fn media_with_filters(
        &self,
        media_type: MediaType,
        filters: &MediaFilters,
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<Media>> {
        let mut params = vec![("mediaType".to_string(), media_type.as_str().to_string())];
        if filters.query.trim().chars().count() >= MIN_SEARCH_LEN {
            params.push(("searchQuery".into(), filters.query.trim().to_string()));
        }
        if !filters.year.is_empty() {
            params.push(("yearFilter".into(), filters.year.clone()));
        }
        if !filters.genre.is_empty() {
            params.push(("genreFilter".into(), filters.genre.clone()));
        }
        if !filters.sort_by.is_empty() {
            params.push(("sortBy".into(), filters.sort_by.clone()));
        }
        params.push(("page".into(), page.to_string()));
        params.push(("pageSize".into(), page_size.to_string()));
        match self.get_json("Media", &["GetMediaWithFilters"], &params) {
            Err(err) if ApiError::is_not_found(&err) => Ok(PageResult::empty(page, page_size)),
            other => other,
        }
    }

    pub fn search_media_and_users(&self, query: &str) -> Result<SearchResults> {
        if query.trim().chars().count() < MIN_SEARCH_LEN {
            return Ok(SearchResults::default());
        }
        let params = vec![("query".to_string(), query.trim().to_string())];
        self.get_json("Search", &["SearchMediaAndUsers"], &params)
    }

    fn get_page<T>(
        &self,
        service: &str,
        segments: &[&str],
        page: u32,
        page_size: u32,
    ) -> Result<PageResult<T>>
    where
        T: DeserializeOwned,
    {
        let params = vec![
            ("page".to_string(), page.to_string()),
            ("pageSize".to_string(), page_size.to_string()),
        ];
        match self.get_json(service, segments, &params) {
            Err(err) if ApiError::is_not_found(&err) => Ok(PageResult::empty(page, page_size)),
            other => other,
        }
    }

    // Not-found on a list endpoint means "nothing there yet".
    fn get_list<T>(&self, service: &str, segments: &[&str]) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        match self.get_json(service, segments, &[]) {
            Err(err) if ApiError::is_not_found(&err) => Ok(Vec::new()),
            other => other,
        }
    }

    fn get_json<T>(&self, service: &str, segments: &[&str], params: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.send_json::<T, ()>(Method::GET, service, segments, params, None)
    }

    fn send_json<T, B>(
        &self,
        method: Method,
        service: &str,
        segments: &[&str],
        params: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let resp = self.request(method, service, segments, params, body)?;
        let path = resp.url().path().to_string();
        resp.json::<T>().map_err(|err| {
            ApiError::Decode {
                path,
                message: err.to_string(),
            }
            .into()
        })
    }

    fn send_unit<B>(
        &self,
        method: Method,
        service: &str,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        self.request(method, service, segments, &[], body)?;
        Ok(())
    }

    fn endpoint_url(
        &self,
        service: &str,
        segments: &[&str],
        params: &[(String, String)],
    ) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow::anyhow!("poplens: base url cannot carry paths"))?;
            path.pop_if_empty();
            path.push(service);
            path.extend(segments);
        }
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn request<B>(
        &self,
        method: Method,
        service: &str,
        segments: &[&str],
        params: &[(String, String)],
        body: Option<&B>,
    ) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint_url(service, segments, params)?;
        tracing::debug!(%method, %url, "poplens request");

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        if let Some(token) = self.token_provider.bearer_token() {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().map_err(ApiError::Transport)?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            let err = match status {
                StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
                StatusCode::FORBIDDEN => ApiError::Forbidden,
                StatusCode::NOT_FOUND => ApiError::NotFound,
                _ => ApiError::Status { status, body },
            };
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    use crossbeam_channel::{unbounded, Receiver};

    use crate::data::{ApiFeedService, FeedService};
    use crate::feed::FeedKind;

    struct StaticToken(&'static str);

    impl TokenProvider for StaticToken {
        fn bearer_token(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[derive(Debug)]
    struct Seen {
        method: String,
        url: String,
        authorization: Option<String>,
        body: String,
    }

    /// Serves `responses` in order and reports each request it saw.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Receiver<Seen>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = unbounded();
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok(mut request) = server.recv() else {
                    return;
                };
                let mut payload = String::new();
                let _ = request.as_reader().read_to_string(&mut payload);
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_string());
                let _ = tx.send(Seen {
                    method: request.method().as_str().to_string(),
                    url: request.url().to_string(),
                    authorization,
                    body: payload,
                });
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .unwrap();
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });
        (format!("http://{addr}/api"), rx)
    }

    fn client(base: String, token: Arc<dyn TokenProvider>) -> Client {
        Client::new(
            token,
            ClientConfig {
                base_url: Some(base),
                user_agent: "poplens-test".into(),
                timeout: Some(Duration::from_secs(5)),
                http_client: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn attaches_bearer_token_and_builds_path() {
        let (base, seen) = serve(vec![(200, "[]")]);
        let api = client(base, Arc::new(StaticToken("tok-1")));
        let comments = api.top_level_comments("r 1").unwrap();
        assert!(comments.is_empty());
        let request = seen.recv().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "/api/Review/r%201/TopLevelComments");
        assert_eq!(request.authorization.as_deref(), Some("Bearer tok-1"));
    }

    #[test]
    fn anonymous_requests_carry_no_authorization() {
        let (base, seen) = serve(vec![(200, r#"{"token":"t","userId":"u","profileId":"p"}"#)]);
        let api = client(base, Arc::new(NoToken));
        let login = api
            .login(&LoginRequest {
                username: "ana".into(),
                password: "pw".into(),
            })
            .unwrap();
        assert_eq!(login.profile_id, "p");
        let request = seen.recv().unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.url, "/api/UserAuthentication/Login");
        assert!(request.authorization.is_none());
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["username"], "ana");
    }

    #[test]
    fn feed_page_sends_page_parameters() {
        let (base, seen) = serve(vec![(
            200,
            r#"{"page":2,"pageSize":10,"totalCount":11,"result":[{"id":"r11"}]}"#,
        )]);
        let api = client(base, Arc::new(NoToken));
        let page = api.follower_feed("p1", 2, 10).unwrap();
        assert_eq!(page.result.len(), 1);
        let request = seen.recv().unwrap();
        assert_eq!(request.url, "/api/Feed/GetFollowerFeed/p1?page=2&pageSize=10");
    }

    #[test]
    fn api_feed_fills_in_own_likes() {
        let (base, seen) = serve(vec![
            (
                200,
                r#"{"page":1,"pageSize":10,"totalCount":2,"result":[{"id":"r1","likeCount":4},{"id":"r2"}]}"#,
            ),
            (200, "true"),
            (500, "{}"),
        ]);
        let feed = ApiFeedService::new(Arc::new(client(base, Arc::new(NoToken))));
        let page = feed.load_page(FeedKind::Following, "p1", 1, 10).unwrap();
        assert!(page.result[0].liked_by_me);
        assert_eq!(page.result[0].like_count, 4);
        assert!(!page.result[1].liked_by_me);
        let urls: Vec<String> = seen.try_iter().map(|request| request.url).collect();
        assert_eq!(
            urls,
            vec![
                "/api/Feed/GetFollowerFeed/p1?page=1&pageSize=10",
                "/api/Review/p1/r1/HasLiked",
                "/api/Review/p1/r2/HasLiked",
            ]
        );
    }

    #[test]
    fn reply_posts_parent_id() {
        let (base, seen) = serve(vec![(
            200,
            r#"{"id":"c9","reviewId":"r1","parentCommentId":"c1","profileId":"p1","content":"yes"}"#,
        )]);
        let api = client(base, Arc::new(NoToken));
        let created = api
            .add_comment(
                "p1",
                "r1",
                &CreateCommentRequest {
                    content: "yes".into(),
                    parent_comment_id: Some("c1".into()),
                },
            )
            .unwrap();
        assert_eq!(created.id, "c9");
        let request = seen.recv().unwrap();
        assert_eq!(request.url, "/api/Review/p1/r1/Comment");
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["parentCommentId"], "c1");
    }

    #[test]
    fn not_found_lists_are_empty() {
        let (base, _seen) = serve(vec![(404, "{}"), (404, "{}")]);
        let api = client(base, Arc::new(NoToken));
        assert!(api.replies("c1").unwrap().is_empty());
        let page = api.recommendation_feed("p1", 1, 10).unwrap();
        assert!(page.result.is_empty());
    }

    #[test]
    fn unauthorized_maps_to_typed_error() {
        let (base, _seen) = serve(vec![(401, "{}")]);
        let api = client(base, Arc::new(NoToken));
        let err = api.profile("p1").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn short_search_skips_network() {
        let api = client("http://127.0.0.1:9/api".into(), Arc::new(NoToken));
        let results = api.search_media_and_users("a").unwrap();
        assert!(results.media.is_empty() && results.users.is_empty());
    }

    #[test]
    fn add_review_accepts_bare_id() {
        let (base, _seen) = serve(vec![(200, r#""rev-7""#)]);
        let api = client(base, Arc::new(NoToken));
        let created = api
            .add_review(
                "p1",
                &CreateReviewRequest {
                    media_id: "m1".into(),
                    content: "loved it".into(),
                    rating: 5,
                },
            )
            .unwrap();
        assert_eq!(created.id.as_deref(), Some("rev-7"));
    }
}
