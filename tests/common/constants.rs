//! Shared constants for end-to-end tests
//!
//! When mock backend credentials or catalog ids change, update only this file.

// ============================================================================
// Backend credentials
// ============================================================================

pub const BACKEND_USER: &str = "admin";

pub const BACKEND_PASS: &str = "backendpass123";

pub const SOURCE_API_KEY: &str = "source-key-123";

// ============================================================================
// Catalog ids
// ============================================================================

/// "The Matrix"
pub const MOVIE_TMDB_ID: i64 = 603;

/// "Game of Thrones"
pub const SHOW_TMDB_ID: i64 = 1399;

/// Localized kind labels used by the backend history
pub const MOVIE_LABEL: &str = "电影";
pub const TV_LABEL: &str = "电视剧";
