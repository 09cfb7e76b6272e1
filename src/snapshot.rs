use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::mapping::KeywordMap;
use crate::stats::KeywordSummary;
use crate::store;

/// Fixed name for the most recent snapshot.
pub const LATEST_SNAPSHOT_NAME: &str = "ranks_latest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SnapshotMeta {
    pub generated_at_utc: String,
    pub requested_keywords: usize,
    pub in_account: usize,
    pub missing_in_account: usize,
    pub stats_rows: usize,
}

/// Per-device observation as stored in the snapshot (`{avgRnk, imp}`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceSnapshot {
    #[serde(rename = "avgRnk")]
    pub avg_rnk: Option<f64>,
    pub imp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordSnapshot {
    pub in_account: bool,
    pub ids: Vec<String>,
    #[serde(rename = "PC")]
    pub pc: DeviceSnapshot,
    #[serde(rename = "MOBILE")]
    pub mobile: DeviceSnapshot,
}

/// One run's full observation document, written every run to a fixed "latest"
/// path and a timestamped historical path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(rename = "_meta")]
    pub meta: SnapshotMeta,
    pub missing_in_account: Vec<String>,
    pub keywords: BTreeMap<String, KeywordSnapshot>,
}

fn device_snapshot(agg: &crate::stats::DeviceAggregate) -> DeviceSnapshot {
    DeviceSnapshot {
        avg_rnk: agg.avg_rank,
        imp: agg.impressions,
    }
}

/// Build the snapshot for one run from the requested keywords, the account
/// map, and the aggregated stats.
pub fn build_snapshot(
    wanted: &[String],
    map: &KeywordMap,
    missing: &[String],
    summary: &BTreeMap<String, KeywordSummary>,
    stats_rows: usize,
) -> Snapshot {
    let mut keywords = BTreeMap::new();

    for kw in wanted {
        let ids: Vec<String> = map
            .map
            .get(kw)
            .map(|entries| entries.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default();
        let in_account = !ids.is_empty();
        let devices = summary.get(kw).copied().unwrap_or_default();

        keywords.insert(
            kw.clone(),
            KeywordSnapshot {
                in_account,
                ids,
                pc: device_snapshot(&devices.pc),
                mobile: device_snapshot(&devices.mobile),
            },
        );
    }

    Snapshot {
        meta: SnapshotMeta {
            generated_at_utc: chrono::Utc::now().to_rfc3339(),
            requested_keywords: wanted.len(),
            in_account: wanted.len() - missing.len(),
            missing_in_account: missing.len(),
            stats_rows,
        },
        missing_in_account: missing.to_vec(),
        keywords,
    }
}

/// Compact UTC timestamp for historical file names, e.g. `20260829_093000Z`.
pub fn utc_ts_compact() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%SZ").to_string()
}

/// Write the snapshot to `<outdir>/ranks_latest.json` and a timestamped
/// sibling, returning both paths.
pub fn write_snapshot(outdir: &Path, snapshot: &Snapshot) -> Result<(PathBuf, PathBuf)> {
    let latest = outdir.join(LATEST_SNAPSHOT_NAME);
    let historical = outdir.join(format!("ranks_{}.json", utc_ts_compact()));
    store::write_json_atomic(&latest, snapshot)?;
    store::write_json_atomic(&historical, snapshot)?;
    Ok((latest, historical))
}
