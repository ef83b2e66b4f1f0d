use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of client-generated ids for comments that have not been confirmed.
pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

pub fn temp_id(now: DateTime<Utc>, seq: u64) -> String {
    format!("{TEMP_ID_PREFIX}{}-{seq}", now.timestamp_millis())
}

/// The gateway emits both RFC 3339 and offset-less timestamps.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub review_id: String,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub last_updated_date: String,
    #[serde(default)]
    pub reply_count: Option<u32>,
    #[serde(default, alias = "replies", skip_serializing_if = "Option::is_none")]
    pub detailed_replies: Option<Vec<Comment>>,
}

impl Comment {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_date)
    }

    pub fn author_label(&self) -> &str {
        match self.username.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "User",
        }
    }

    pub fn is_temporary(&self) -> bool {
        is_temp_id(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    #[serde(alias = "FILM", alias = "Film")]
    Film,
    #[serde(alias = "BOOK", alias = "Book")]
    Book,
    #[serde(alias = "GAME", alias = "Game")]
    Game,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Film, MediaType::Book, MediaType::Game];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Film => "film",
            MediaType::Book => "book",
            MediaType::Game => "game",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            MediaType::Film => "Films",
            MediaType::Book => "Books",
            MediaType::Game => "Games",
        }
    }

    /// Unknown strings fall back to film, matching how reviews are rendered.
    pub fn parse_lenient(raw: &str) -> MediaType {
        match raw.trim().to_ascii_lowercase().as_str() {
            "book" => MediaType::Book,
            "game" => MediaType::Game,
            _ => MediaType::Film,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A review as shown in feeds, on profiles and at the top of a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDetail {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub media_id: String,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub last_updated_date: String,
    #[serde(default)]
    pub media_title: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub media_cached_image_path: String,
    #[serde(default)]
    pub media_creator: String,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(default)]
    pub liked_by_me: bool,
}

pub type FeedItem = ReviewDetail;

impl ReviewDetail {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_date)
    }

    pub fn media_kind(&self) -> MediaType {
        MediaType::parse_lenient(&self.media_type)
    }

    pub fn author_label(&self) -> &str {
        match self.username.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub media_id: String,
    #[serde(default)]
    pub created_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MediaMainPageReviewInfo {
    #[serde(default)]
    pub rating_chart_info: HashMap<String, u32>,
    #[serde(default)]
    pub popular_reviews: Vec<Review>,
    #[serde(default)]
    pub recent_reviews: Vec<Review>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub publish_date: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub cached_external_id: String,
    #[serde(default)]
    pub cached_image_path: String,
    #[serde(default)]
    pub avg_rating: f32,
    #[serde(default)]
    pub total_reviews: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub writer: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
}

impl Media {
    /// Director, writer or publisher depending on the media type.
    pub fn creator(&self) -> &str {
        self.director
            .as_deref()
            .or(self.writer.as_deref())
            .or(self.publisher.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub follower_id: String,
    #[serde(default)]
    pub following_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReviewRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub reviews: Vec<ReviewRef>,
    #[serde(default)]
    pub detailed_reviews: Vec<ReviewDetail>,
    #[serde(default)]
    pub followers: Vec<Follow>,
    #[serde(default)]
    pub following: Vec<Follow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
}

impl<T> PageResult<T> {
    pub fn empty(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            total_count: 0,
            result: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub profile_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserIds {
    pub profile_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub media_id: String,
    pub content: String,
    pub rating: u8,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreatedReview {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "userName")]
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchResults {
    #[serde(default)]
    pub media: Vec<Media>,
    #[serde(default)]
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaFilters {
    pub query: String,
    pub year: String,
    pub genre: String,
    pub sort_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_decodes_nested_replies() {
        let raw = r#"{
            "id": "c1",
            "reviewId": "r1",
            "parentCommentId": null,
            "profileId": "p1",
            "username": "ana",
            "content": "great take",
            "createdDate": "2024-03-01T10:00:00",
            "lastUpdatedDate": "2024-03-01T10:00:00",
            "replyCount": 1,
            "replies": [{"id": "c2", "reviewId": "r1", "parentCommentId": "c1", "profileId": "p2", "content": "agreed"}]
        }"#;
        let comment: Comment = serde_json::from_str(raw).unwrap();
        assert_eq!(comment.reply_count, Some(1));
        let replies = comment.detailed_replies.as_ref().unwrap();
        assert_eq!(replies[0].parent_comment_id.as_deref(), Some("c1"));
        assert!(comment.created_at().is_some());
    }

    #[test]
    fn temp_ids_are_distinguishable() {
        let id = temp_id(Utc::now(), 3);
        assert!(is_temp_id(&id));
        assert!(!is_temp_id("6f1c2a90-1d2e-4b6a-9e53-3f2f3b0c9a11"));
    }

    #[test]
    fn media_type_accepts_upper_case() {
        let media: Media =
            serde_json::from_str(r#"{"id": "m1", "title": "Dune", "type": "BOOK"}"#).unwrap();
        assert_eq!(media.media_type, MediaType::Book);
        assert_eq!(MediaType::parse_lenient("GAME"), MediaType::Game);
        assert_eq!(MediaType::parse_lenient("poster"), MediaType::Film);
    }

    #[test]
    fn page_result_tolerates_missing_result() {
        let page: PageResult<ReviewDetail> =
            serde_json::from_str(r#"{"page": 3, "pageSize": 10, "totalCount": 20}"#).unwrap();
        assert!(page.result.is_empty());
        assert_eq!(page.page, 3);
    }

    #[test]
    fn create_comment_omits_missing_parent() {
        let body = serde_json::to_value(CreateCommentRequest {
            content: "hi".into(),
            parent_comment_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"content": "hi"}));
    }

    #[test]
    fn parse_timestamp_handles_offsets() {
        let ts = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        assert_eq!(ts.timestamp(), 1_709_287_200);
        assert!(parse_timestamp("").is_none());
    }
}
