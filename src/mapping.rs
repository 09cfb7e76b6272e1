use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::SignedClient;
use crate::store;
use crate::{ADGROUPS_PATH, CAMPAIGNS_PATH, KEYWORDS_PATH};

/// Default on-disk location for the account keyword map.
pub const CACHE_PATH: &str = "cache/keyword_map.json";

/// Cache format version; bump on incompatible layout changes.
pub const CACHE_VERSION: u32 = 1;

/// One platform registration of a keyword. The same keyword text can be
/// managed under several ad groups/campaigns, each with its own platform ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordEntry {
    pub id: String,
    pub keyword: String,
    #[serde(rename = "adGroupId")]
    pub ad_group_id: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheMeta {
    pub version: u32,
}

/// Account keyword map: keyword text → platform registrations. Cached to disk
/// between runs; invalidated by a forced refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordMap {
    #[serde(rename = "_meta")]
    pub meta: CacheMeta,
    pub map: BTreeMap<String, Vec<KeywordEntry>>,
}

/// Wanted keywords resolved against the account map.
#[derive(Debug, Default)]
pub struct ResolvedKeywords {
    /// Platform IDs to query, in keyword-list order.
    pub keyword_ids: Vec<String>,
    /// Reverse lookup used when attributing stats rows.
    pub id_to_keyword: HashMap<String, String>,
    /// Requested keywords with no registration in the account. Reported,
    /// never an error.
    pub missing: Vec<String>,
}

fn norm_keyword(s: &str) -> &str {
    s.trim()
}

/// Deduplicate while preserving first-occurrence order.
fn dedup_ordered(keywords: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

/// Load keywords from a plain text file, one per line.
pub fn load_keywords_txt(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let keywords = contents
        .lines()
        .map(norm_keyword)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    Ok(dedup_ordered(keywords))
}

/// Load keywords from a CSV file with a `keyword` column.
pub fn load_keywords_csv(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let keyword_idx = reader
        .headers()
        .context("failed to read CSV headers")?
        .iter()
        .position(|h| h.trim() == "keyword")
        .context("CSV must have a 'keyword' column")?;

    let mut keywords = Vec::new();
    for record in reader.records() {
        let record = record.context("failed to read CSV record")?;
        if let Some(field) = record.get(keyword_idx) {
            let k = norm_keyword(field);
            if !k.is_empty() {
                keywords.push(k.to_string());
            }
        }
    }
    Ok(dedup_ordered(keywords))
}

// Listing responses; only the fields we use. Entries missing an ID are
// skipped rather than failing the listing.

#[derive(Debug, Deserialize)]
struct Campaign {
    #[serde(rename = "nccCampaignId")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdGroup {
    #[serde(rename = "nccAdgroupId")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiKeyword {
    #[serde(rename = "nccKeywordId")]
    id: Option<String>,
    keyword: Option<String>,
}

fn parse_listing<T: serde::de::DeserializeOwned>(
    body: crate::client::ResponseBody,
    what: &str,
) -> Result<Vec<T>> {
    let value = body
        .into_json()
        .with_context(|| format!("{what} listing was not JSON"))?;
    serde_json::from_value(value).with_context(|| format!("unexpected {what} listing shape"))
}

/// Build the account keyword map from the three nested listing endpoints
/// (campaigns → ad groups → keywords), reusing the on-disk cache unless
/// `force_refresh` is set.
pub async fn build_keyword_map(
    client: &SignedClient,
    cache_path: &Path,
    force_refresh: bool,
) -> Result<KeywordMap> {
    if !force_refresh {
        if let Some(cached) = store::read_json_opt::<KeywordMap>(cache_path) {
            if cached.meta.version == CACHE_VERSION {
                debug!("Using keyword map cache at {}", cache_path.display());
                return Ok(cached);
            }
        }
    }

    let campaigns: Vec<Campaign> =
        parse_listing(client.get(CAMPAIGNS_PATH, &[]).await?, "campaign")?;
    info!("Listing {} campaign(s)", campaigns.len());

    let mut map: BTreeMap<String, Vec<KeywordEntry>> = BTreeMap::new();

    for campaign in campaigns {
        let Some(campaign_id) = campaign.id else {
            continue;
        };

        let adgroups: Vec<AdGroup> = parse_listing(
            client
                .get(
                    ADGROUPS_PATH,
                    &[("nccCampaignId".to_string(), campaign_id.clone())],
                )
                .await?,
            "ad group",
        )?;

        for adgroup in adgroups {
            let Some(adgroup_id) = adgroup.id else {
                continue;
            };

            let keywords: Vec<ApiKeyword> = parse_listing(
                client
                    .get(
                        KEYWORDS_PATH,
                        &[("nccAdgroupId".to_string(), adgroup_id.clone())],
                    )
                    .await?,
                "keyword",
            )?;

            for kw in keywords {
                let (Some(id), Some(text)) = (kw.id, kw.keyword) else {
                    continue;
                };
                let text = norm_keyword(&text);
                if id.is_empty() || text.is_empty() {
                    continue;
                }
                map.entry(text.to_string()).or_default().push(KeywordEntry {
                    id,
                    keyword: text.to_string(),
                    ad_group_id: adgroup_id.clone(),
                    campaign_id: campaign_id.clone(),
                });
            }
        }
    }

    let wrapped = KeywordMap {
        meta: CacheMeta {
            version: CACHE_VERSION,
        },
        map,
    };
    store::write_json_atomic(cache_path, &wrapped)?;
    info!(
        "Keyword map rebuilt: {} unique keyword(s), cached at {}",
        wrapped.map.len(),
        cache_path.display()
    );
    Ok(wrapped)
}

/// Resolve wanted keywords to platform IDs via the account map, collecting
/// the ones the account does not carry.
pub fn resolve_keywords(wanted: &[String], map: &KeywordMap) -> ResolvedKeywords {
    let mut resolved = ResolvedKeywords::default();
    for kw in wanted {
        match map.map.get(kw) {
            Some(entries) if !entries.is_empty() => {
                for entry in entries {
                    resolved.keyword_ids.push(entry.id.clone());
                    resolved
                        .id_to_keyword
                        .insert(entry.id.clone(), kw.clone());
                }
            }
            _ => resolved.missing.push(kw.clone()),
        }
    }
    resolved
}
