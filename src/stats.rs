use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{ResponseBody, SignedClient, StatsParams, TimeRange};
use crate::{KEYWORD_ID_PREFIX, STATS_PATH};

/// Platform error code for an unsupported field/breakdown combination.
const UNSUPPORTED_COMBO_CODE: &str = "11001";

/// Device-type breakdown dimension.
const DEVICE_BREAKDOWN: &str = "pcMblTp";

/// Primary field set, requested with the device breakdown.
const FIELDS_PRIMARY: [&str; 3] = ["impCnt", "clkCnt", "avgRnk"];

/// Reduced field set for the no-breakdown fallback.
const FIELDS_FALLBACK: [&str; 2] = ["impCnt", "avgRnk"];

/// Delay between stats batches: 50ms base plus up to 150ms jitter.
const INTER_BATCH_BASE: Duration = Duration::from_millis(50);
const INTER_BATCH_JITTER_MS: u64 = 150;

/// Device classification. Breakdown labels arrive as natural-language strings
/// or codes in either language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Pc,
    Mobile,
}

impl Device {
    pub const ALL: [Device; 2] = [Device::Pc, Device::Mobile];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pc => "PC",
            Self::Mobile => "MOBILE",
        }
    }

    /// Map a breakdown label to a device, case-insensitively and by substring.
    /// Unrecognized labels yield `None` and the row is dropped, so one
    /// malformed row cannot abort aggregation.
    pub fn normalize(label: &str) -> Option<Self> {
        let n = label.trim().to_lowercase();
        if n.is_empty() {
            return None;
        }
        if n.contains("모바일") || n.contains("mobile") {
            return Some(Self::Mobile);
        }
        if n == "pc" || n.contains("desktop") || n.contains("데스크") || n.contains("피씨") {
            return Some(Self::Pc);
        }
        None
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device split inside a stats row.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BreakdownRow {
    pub name: Option<String>,
    #[serde(rename = "impCnt")]
    pub imp_cnt: Option<f64>,
    #[serde(rename = "clkCnt")]
    pub clk_cnt: Option<f64>,
    #[serde(rename = "avgRnk")]
    pub avg_rnk: Option<f64>,
}

/// One platform-returned observation row. Every field is optional — the
/// upstream schema is not strictly guaranteed across accounts/versions.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StatsRow {
    pub id: Option<String>,
    #[serde(rename = "impCnt")]
    pub imp_cnt: Option<f64>,
    #[serde(rename = "clkCnt")]
    pub clk_cnt: Option<f64>,
    #[serde(rename = "avgRnk")]
    pub avg_rnk: Option<f64>,
    #[serde(default)]
    pub breakdowns: Vec<BreakdownRow>,
}

/// The closed set of shapes a stats response can take.
#[derive(Debug)]
pub enum StatsResponse {
    /// A list of rows, bare or under a `data` envelope.
    Rows(Vec<StatsRow>),
    /// Anything else, kept verbatim for logging.
    Opaque(Value),
}

/// Classify a stats response body. Rows that fail to deserialize are skipped
/// individually rather than failing the batch.
pub fn parse_stats_response(value: Value) -> StatsResponse {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(ref obj) => match obj.get("data") {
            Some(Value::Array(items)) => items.clone(),
            _ => return StatsResponse::Opaque(value),
        },
        other => return StatsResponse::Opaque(other),
    };

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<StatsRow>(item) {
            Ok(row) => rows.push(row),
            Err(e) => warn!("Skipping malformed stats row: {e}"),
        }
    }
    StatsResponse::Rows(rows)
}

/// Keep only keyword-entity IDs. Mixed entity types in one stats call trigger
/// a protocol-level rejection, so everything else is dropped up front.
pub fn filter_keyword_ids(ids: &[String]) -> Vec<String> {
    ids.iter()
        .filter(|id| id.starts_with(KEYWORD_ID_PREFIX))
        .cloned()
        .collect()
}

/// Downgrade a rejected breakdown request: same ids and time range, reduced
/// field set, no breakdown dimension.
fn fallback_params(primary: StatsParams) -> StatsParams {
    StatsParams {
        fields: FIELDS_FALLBACK.iter().map(|s| s.to_string()).collect(),
        breakdown: None,
        ..primary
    }
}

/// Fetch today's stats rows for the given keyword IDs, batched to the
/// configured per-call limit with a jittered delay between batches.
///
/// Each batch first requests the primary field set with the device breakdown;
/// if the platform rejects that combination (code 11001) the batch is retried
/// with the reduced field set and no breakdown. Other errors propagate.
pub async fn fetch_stats_by_keyword_ids(
    client: &SignedClient,
    keyword_ids: &[String],
    max_ids_per_call: usize,
) -> Result<Vec<StatsRow>> {
    let keyword_ids = filter_keyword_ids(keyword_ids);
    if keyword_ids.is_empty() {
        return Ok(Vec::new());
    }

    let time_range = TimeRange::today();
    let mut all_rows = Vec::new();

    for batch in keyword_ids.chunks(max_ids_per_call.max(1)) {
        let primary = StatsParams {
            ids: batch.to_vec(),
            fields: FIELDS_PRIMARY.iter().map(|s| s.to_string()).collect(),
            time_range: time_range.clone(),
            time_increment: None,
            breakdown: Some(DEVICE_BREAKDOWN.to_string()),
        };

        let body = match client.get(STATS_PATH, &primary.to_query()).await {
            Ok(body) => body,
            Err(e) if e.has_code(UNSUPPORTED_COMBO_CODE) => {
                debug!("Breakdown combination rejected ({UNSUPPORTED_COMBO_CODE}), retrying without breakdown");
                client
                    .get(STATS_PATH, &fallback_params(primary).to_query())
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        match body {
            ResponseBody::Json(value) => match parse_stats_response(value) {
                StatsResponse::Rows(rows) => all_rows.extend(rows),
                StatsResponse::Opaque(raw) => {
                    warn!("Unexpected stats response shape: {raw}");
                }
            },
            ResponseBody::Text(text) => warn!("Non-JSON stats response: {text}"),
            ResponseBody::Empty => {}
        }

        let jitter = Duration::from_millis(fastrand::u64(0..=INTER_BATCH_JITTER_MS));
        tokio::time::sleep(INTER_BATCH_BASE + jitter).await;
    }

    Ok(all_rows)
}

/// Per-keyword, per-device aggregate over the observation window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceAggregate {
    /// Impression-weighted mean rank; `None` when no row contributed weight.
    pub avg_rank: Option<f64>,
    pub impressions: u64,
    pub clicks: u64,
}

/// Both device aggregates for one keyword. Devices with no contributing rows
/// keep the zero aggregate, which the detector treats as a failed observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeywordSummary {
    pub pc: DeviceAggregate,
    pub mobile: DeviceAggregate,
}

impl KeywordSummary {
    pub fn device(&self, device: Device) -> &DeviceAggregate {
        match device {
            Device::Pc => &self.pc,
            Device::Mobile => &self.mobile,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Accum {
    impressions: u64,
    clicks: u64,
    rank_weight: f64,
    weight: f64,
}

impl Accum {
    fn add(&mut self, imp: f64, clk: f64, avg_rnk: Option<f64>) {
        self.impressions += imp.max(0.0) as u64;
        self.clicks += clk.max(0.0) as u64;
        if let Some(rank) = avg_rnk {
            if imp > 0.0 {
                self.rank_weight += rank * imp;
                self.weight += imp;
            }
        }
    }

    fn finalize(self) -> DeviceAggregate {
        DeviceAggregate {
            avg_rank: (self.weight > 0.0).then(|| self.rank_weight / self.weight),
            impressions: self.impressions,
            clicks: self.clicks,
        }
    }
}

/// Aggregate stats rows per keyword and device.
///
/// Rows are attributed to keywords through `id_to_keyword`; rows for unknown
/// IDs are dropped. Only breakdown entries carry a device, so rows without a
/// breakdown list contribute to no device bucket. Average rank is the
/// impression-weighted mean over entries where both rank and positive
/// impressions exist.
pub fn summarize_by_keyword(
    rows: &[StatsRow],
    id_to_keyword: &HashMap<String, String>,
) -> BTreeMap<String, KeywordSummary> {
    let mut accums: BTreeMap<String, (Accum, Accum)> = BTreeMap::new();

    for row in rows {
        let Some(keyword) = row.id.as_deref().and_then(|id| id_to_keyword.get(id)) else {
            continue;
        };
        let (pc, mobile) = accums.entry(keyword.clone()).or_default();

        for breakdown in &row.breakdowns {
            let Some(device) = breakdown.name.as_deref().and_then(Device::normalize) else {
                continue;
            };
            let accum = match device {
                Device::Pc => &mut *pc,
                Device::Mobile => &mut *mobile,
            };
            accum.add(
                breakdown.imp_cnt.unwrap_or(0.0),
                breakdown.clk_cnt.unwrap_or(0.0),
                breakdown.avg_rnk,
            );
        }
    }

    accums
        .into_iter()
        .map(|(keyword, (pc, mobile))| {
            (
                keyword,
                KeywordSummary {
                    pc: pc.finalize(),
                    mobile: mobile.finalize(),
                },
            )
        })
        .collect()
}
