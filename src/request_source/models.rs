//! Wire types for the request-management front end.

use serde::Deserialize;
use thiserror::Error;

use crate::ledger::MediaKind;

/// Upstream status code of an approved request.
pub const STATUS_APPROVED: i32 = 2;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request source unreachable: {0}")]
    Network(String),

    #[error("request source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode request source response: {0}")]
    Decode(String),

    #[error("invalid page size {0}, must be at least 1")]
    InvalidPageSize(u32),

    /// The source kept returning full pages past the safety cap.
    #[error("pagination exceeded {skip} requests, aborting pass")]
    PaginationCapExceeded { skip: u32 },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageInfo {
    pub pages: u32,
    pub results: u32,
    pub page: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestsPage {
    pub page_info: PageInfo,
    pub results: Vec<SourceRequest>,
}

/// One media request as listed by the front end.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceRequest {
    pub id: i64,
    pub status: i32,
    pub media: SourceMedia,
    /// RFC 3339
    pub created_at: Option<String>,
    pub seasons: Vec<SeasonRequest>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceMedia {
    pub tmdb_id: i64,
    /// "movie" or "tv"
    pub media_type: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SeasonRequest {
    pub season_number: i32,
    pub episodes: Vec<EpisodeRequest>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EpisodeRequest {
    pub episode_number: i32,
}

impl SourceRequest {
    pub fn is_approved(&self) -> bool {
        self.status == STATUS_APPROVED
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        MediaKind::from_str(&self.media.media_type)
    }

    /// Creation time as a unix timestamp, if present and well formed.
    pub fn requested_at(&self) -> Option<i64> {
        let raw = self.created_at.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.timestamp())
    }
}

/// Title and artwork of a movie or show.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaDetails {
    pub id: i64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub original_title: Option<String>,
    pub original_name: Option<String>,
    pub poster_path: Option<String>,
}

impl MediaDetails {
    /// Movies carry `title`, shows `name`; originals are the fallback.
    pub fn display_title(&self) -> Option<String> {
        [
            &self.title,
            &self.name,
            &self.original_title,
            &self.original_name,
        ]
        .into_iter()
        .flatten()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .map(str::to_string)
    }
}

/// Placeholder title used when no details could be fetched.
pub fn fallback_title(tmdb_id: i64) -> String {
    format!("TMDB-{}", tmdb_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests_page() {
        let page: RequestsPage = serde_json::from_str(
            r#"{
                "pageInfo": {"pages": 1, "results": 2, "page": 1},
                "results": [
                    {"id": 7, "status": 2, "createdAt": "2024-03-01T10:00:00.000Z",
                     "media": {"id": 3, "tmdbId": 1399, "mediaType": "tv"},
                     "seasons": [
                        {"id": 1, "seasonNumber": 1, "status": 2},
                        {"id": 2, "seasonNumber": 2, "status": 2,
                         "episodes": [{"id": 9, "episodeNumber": 3, "status": 2}]}
                     ]},
                    {"id": 8, "status": 1, "media": {"tmdbId": 603, "mediaType": "movie"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(page.results.len(), 2);
        let tv = &page.results[0];
        assert!(tv.is_approved());
        assert_eq!(tv.media_kind(), Some(MediaKind::Tv));
        assert_eq!(tv.seasons[1].episodes[0].episode_number, 3);
        assert_eq!(tv.requested_at(), Some(1709287200));

        let movie = &page.results[1];
        assert!(!movie.is_approved());
        assert_eq!(movie.media_kind(), Some(MediaKind::Movie));
        assert_eq!(movie.requested_at(), None);
    }

    #[test]
    fn test_display_title_fallback_chain() {
        let details = MediaDetails {
            name: Some("Show".to_string()),
            original_title: Some("Original".to_string()),
            ..Default::default()
        };
        assert_eq!(details.display_title().as_deref(), Some("Show"));

        let details = MediaDetails {
            title: Some("  ".to_string()),
            original_name: Some("Nom".to_string()),
            ..Default::default()
        };
        assert_eq!(details.display_title().as_deref(), Some("Nom"));

        assert_eq!(MediaDetails::default().display_title(), None);
        assert_eq!(fallback_title(42), "TMDB-42");
    }
}
