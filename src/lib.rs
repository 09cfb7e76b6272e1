pub mod client;
pub mod config;
pub mod detector;
pub mod error;
pub mod mapping;
pub mod notify;
pub mod report;
pub mod snapshot;
pub mod stats;
pub mod store;

/// SearchAd API base URL (overridable via the `API_BASE` env var)
pub const DEFAULT_API_BASE: &str = "https://api.searchad.naver.com";

/// Listing endpoint for campaigns (top-level grouping)
pub const CAMPAIGNS_PATH: &str = "/ncc/campaigns";

/// Listing endpoint for ad groups within a campaign
pub const ADGROUPS_PATH: &str = "/ncc/adgroups";

/// Listing endpoint for keywords within an ad group
pub const KEYWORDS_PATH: &str = "/ncc/keywords";

/// Statistics endpoint (comma-joined ids, JSON-encoded fields/timeRange)
pub const STATS_PATH: &str = "/stats";

/// Entity-ID prefix for keywords. The stats endpoint rejects calls that mix
/// entity types, so only IDs with this prefix are ever sent.
pub const KEYWORD_ID_PREFIX: &str = "nkw-";
