//! Upstream request source.
//!
//! Lists approved media requests from the request-management front end and
//! resolves their titles and posters.

mod client;
mod models;
mod poster;

#[cfg(feature = "mock")]
pub use client::MockRequestSource;
pub use client::{fetch_all_approved, RequestSource, SeerrClient, MAX_PAGINATION_SKIP};
pub use models::{
    fallback_title, EpisodeRequest, MediaDetails, PageInfo, RequestsPage, SeasonRequest,
    SourceError, SourceMedia, SourceRequest, STATUS_APPROVED,
};
pub use poster::{PosterLookup, TmdbClient};
