use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::snapshot::{DeviceSnapshot, Snapshot, SnapshotMeta};
use crate::stats::Device;
use crate::store;

/// Fixed name for the most recent report.
pub const LATEST_REPORT_NAME: &str = "report_latest.json";

/// Number of missing keywords sampled into the report.
const MISSING_SAMPLE_LEN: usize = 50;

/// Bucket display order for the console summary.
pub const BUCKET_ORDER: [&str; 9] = [
    "1", "2-3", "4-5", "6-10", "11-20", "21-50", "51-100", "100+", "none",
];

/// Bucket an average rank. Undefined ranks land in `"none"`.
pub fn bucket_rank(avg_rnk: Option<f64>) -> &'static str {
    let Some(r) = avg_rnk else {
        return "none";
    };
    if r <= 1.0 {
        "1"
    } else if r <= 3.0 {
        "2-3"
    } else if r <= 5.0 {
        "4-5"
    } else if r <= 10.0 {
        "6-10"
    } else if r <= 20.0 {
        "11-20"
    } else if r <= 50.0 {
        "21-50"
    } else if r <= 100.0 {
        "51-100"
    } else {
        "100+"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportMeta {
    pub generated_at_utc: String,
    pub input_meta: SnapshotMeta,
    pub min_imp_filter: u64,
    pub top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportCounts {
    pub total_keywords: usize,
    pub missing_in_account: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedItem {
    pub keyword: String,
    #[serde(rename = "avgRnk")]
    pub avg_rnk: f64,
    pub imp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceReport {
    /// Keywords with a defined rank and impressions at the filter minimum.
    pub rank_items_count: usize,
    #[serde(rename = "mean_avgRnk")]
    pub mean_avg_rnk: Option<f64>,
    pub buckets: BTreeMap<String, u32>,
}

/// Rank-distribution report derived from one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankReport {
    #[serde(rename = "_meta")]
    pub meta: ReportMeta,
    pub counts: ReportCounts,
    pub per_device: BTreeMap<String, DeviceReport>,
    pub top: BTreeMap<String, Vec<RankedItem>>,
    pub bottom: BTreeMap<String, Vec<RankedItem>>,
    pub missing_in_account_sample: Vec<String>,
}

fn device_field(snapshot_kw: &crate::snapshot::KeywordSnapshot, device: Device) -> DeviceSnapshot {
    match device {
        Device::Pc => snapshot_kw.pc,
        Device::Mobile => snapshot_kw.mobile,
    }
}

/// Build the report: per-device rank buckets, mean rank, and top/bottom-N
/// lists (rank ascending, ties kept in snapshot iteration order), filtered by
/// a minimum-impressions threshold.
pub fn build_report(snapshot: &Snapshot, min_imp: u64, top_n: usize) -> RankReport {
    let mut per_device = BTreeMap::new();
    let mut top = BTreeMap::new();
    let mut bottom = BTreeMap::new();

    for device in Device::ALL {
        let mut buckets: BTreeMap<String, u32> = BTreeMap::new();
        let mut candidates: Vec<RankedItem> = Vec::new();

        for (kw, info) in &snapshot.keywords {
            let dev = device_field(info, device);
            *buckets.entry(bucket_rank(dev.avg_rnk).to_string()).or_default() += 1;

            if let Some(avg) = dev.avg_rnk {
                if dev.imp >= min_imp {
                    candidates.push(RankedItem {
                        keyword: kw.clone(),
                        avg_rnk: avg,
                        imp: dev.imp,
                    });
                }
            }
        }

        let mean = if candidates.is_empty() {
            None
        } else {
            Some(candidates.iter().map(|c| c.avg_rnk).sum::<f64>() / candidates.len() as f64)
        };

        // Stable sort keeps tie order as iterated from the snapshot.
        let mut sorted = candidates.clone();
        sorted.sort_by(|a, b| a.avg_rnk.total_cmp(&b.avg_rnk));

        let top_items: Vec<RankedItem> = sorted.iter().take(top_n).cloned().collect();
        let bottom_items: Vec<RankedItem> = sorted
            .iter()
            .rev()
            .take(top_n)
            .cloned()
            .collect();

        per_device.insert(
            device.as_str().to_string(),
            DeviceReport {
                rank_items_count: candidates.len(),
                mean_avg_rnk: mean,
                buckets,
            },
        );
        top.insert(device.as_str().to_string(), top_items);
        bottom.insert(device.as_str().to_string(), bottom_items);
    }

    RankReport {
        meta: ReportMeta {
            generated_at_utc: chrono::Utc::now().to_rfc3339(),
            input_meta: snapshot.meta.clone(),
            min_imp_filter: min_imp,
            top_n,
        },
        counts: ReportCounts {
            total_keywords: snapshot.keywords.len(),
            missing_in_account: snapshot.missing_in_account.len(),
        },
        per_device,
        top,
        bottom,
        missing_in_account_sample: snapshot
            .missing_in_account
            .iter()
            .take(MISSING_SAMPLE_LEN)
            .cloned()
            .collect(),
    }
}

/// Write the report to `<outdir>/report_latest.json` and a timestamped
/// sibling, returning both paths.
pub fn write_report(outdir: &Path, report: &RankReport) -> Result<(PathBuf, PathBuf)> {
    let latest = outdir.join(LATEST_REPORT_NAME);
    let historical = outdir.join(format!("report_{}.json", crate::snapshot::utc_ts_compact()));
    store::write_json_atomic(&latest, report)?;
    store::write_json_atomic(&historical, report)?;
    Ok((latest, historical))
}

/// Format one device's bucket counts in display order. Numeric buckets are
/// shown only when occupied; `none` is always shown, zero included.
fn bucket_line(buckets: &BTreeMap<String, u32>) -> String {
    BUCKET_ORDER
        .iter()
        .filter_map(|b| match buckets.get(*b) {
            Some(count) => Some(format!("{b}={count}")),
            None if *b == "none" => Some("none=0".to_string()),
            None => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print the console summary.
pub fn print_report(report: &RankReport) {
    println!("- total keywords in snapshot: {}", report.counts.total_keywords);
    println!("- missing_in_account: {}", report.counts.missing_in_account);

    for device in Device::ALL {
        let Some(dev) = report.per_device.get(device.as_str()) else {
            continue;
        };
        println!("\n[{device}]");
        println!(
            "  - rank_items_count (avgRnk exists & imp>={}): {}",
            report.meta.min_imp_filter, dev.rank_items_count
        );
        match dev.mean_avg_rnk {
            Some(mean) => println!("  - mean_avgRnk: {mean:.4}"),
            None => println!("  - mean_avgRnk: n/a"),
        }
        println!("  - buckets: {}", bucket_line(&dev.buckets));
    }
}
