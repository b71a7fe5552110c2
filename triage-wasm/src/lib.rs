//! Bridge WASM <-> JavaScript cho bảng điều khiển phân loại cấp cứu.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_wasm_bindgen::{from_value, to_value};
use triage_analytics::{AnalyticsInput, IngestOutcome, SnapshotStore};
use triage_core::{
    normalize_stop_words, AnalyticsConfig, AnalyticsError, AnalyticsSnapshot, ClinicalRange,
    VitalKind,
};
use wasm_bindgen::prelude::*;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsAnalyticsConfig {
    #[serde(default)]
    confidence_bucket_edges: Option<Vec<f64>>,
    /// Ví dụ: `{ "heart_rate": [40, 180] }`.
    #[serde(default)]
    vital_clinical_ranges: Option<BTreeMap<VitalKind, [f64; 2]>>,
    #[serde(default)]
    flow_window_hours: Option<u32>,
    #[serde(default)]
    flow_bucket_width_minutes: Option<u32>,
    #[serde(default)]
    keyword_top_n: Option<usize>,
    #[serde(default)]
    stop_words: Option<Vec<String>>,
}

impl From<JsAnalyticsConfig> for AnalyticsConfig {
    fn from(cfg: JsAnalyticsConfig) -> Self {
        let mut base = AnalyticsConfig::default();
        if let Some(edges) = cfg.confidence_bucket_edges {
            base.confidence_bucket_edges = edges;
        }
        if let Some(ranges) = cfg.vital_clinical_ranges {
            for (kind, [min, max]) in ranges {
                base.vital_clinical_ranges
                    .insert(kind, ClinicalRange::new(min, max));
            }
        }
        if let Some(hours) = cfg.flow_window_hours {
            base.flow_window_hours = hours;
        }
        if let Some(minutes) = cfg.flow_bucket_width_minutes {
            base.flow_bucket_width_minutes = minutes;
        }
        if let Some(top_n) = cfg.keyword_top_n {
            base.keyword_top_n = top_n;
        }
        if let Some(words) = cfg.stop_words {
            base.stop_words = normalize_stop_words(words);
        }
        base
    }
}

/// Tính snapshot một lần từ lô bản ghi (mảng hoặc `{ records, discharges, as_of }`).
#[wasm_bindgen]
pub fn compute_snapshot(input: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let batch = read_batch(input)?;
    let cfg = read_config(config)?;

    let snapshot = triage_analytics::compute_snapshot(&batch, &cfg)
        .map_err(|err| JsValue::from_str(&format_analytics_error(err)))?;

    snapshot_to_js(&snapshot)
}

/// Giữ snapshot đã phát hành trong bộ nhớ trình duyệt và nhận bản ghi mới dần dần.
#[wasm_bindgen]
pub struct TriageDashboard {
    store: SnapshotStore,
}

#[wasm_bindgen]
impl TriageDashboard {
    #[wasm_bindgen(constructor)]
    pub fn new(config: Option<JsValue>) -> Result<TriageDashboard, JsValue> {
        #[cfg(target_arch = "wasm32")]
        console_error_panic_hook::set_once();

        let cfg = read_config(config)?;
        let store = SnapshotStore::new(cfg)
            .map_err(|err| JsValue::from_str(&format_analytics_error(err)))?;
        Ok(Self { store })
    }

    /// Nhận bản ghi mới hoặc bản sửa. Trả về snapshot mới, hoặc `null` nếu
    /// cập nhật được gộp vào lần tính đang chạy.
    pub fn ingest(&self, batch: JsValue) -> Result<JsValue, JsValue> {
        let batch = read_batch(batch)?;
        match self
            .store
            .ingest(batch)
            .map_err(|err| JsValue::from_str(&format_analytics_error(err)))?
        {
            IngestOutcome::Published(snapshot) => snapshot_to_js(&snapshot),
            IngestOutcome::Coalesced => Ok(JsValue::NULL),
        }
    }

    /// Tính lại toàn bộ từ một lô và phát hành.
    pub fn recompute(&self, batch: JsValue) -> Result<JsValue, JsValue> {
        let batch = read_batch(batch)?;
        let snapshot = self
            .store
            .recompute(&batch)
            .map_err(|err| JsValue::from_str(&format_analytics_error(err)))?;
        snapshot_to_js(&snapshot)
    }

    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        snapshot_to_js(&self.store.snapshot())
    }

    pub fn version(&self) -> u64 {
        self.store.version()
    }

    #[wasm_bindgen(js_name = lastFailure)]
    pub fn last_failure(&self) -> Option<String> {
        self.store.last_failure()
    }
}

fn read_batch(input: JsValue) -> Result<AnalyticsInput, JsValue> {
    let value = from_value::<serde_json::Value>(input)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được JSON bản ghi: {err}")))?;
    AnalyticsInput::from_value(value).map_err(|err| JsValue::from_str(&format_analytics_error(err)))
}

fn read_config(config: Option<JsValue>) -> Result<AnalyticsConfig, JsValue> {
    match config {
        Some(js_cfg) if !js_cfg.is_undefined() && !js_cfg.is_null() => {
            let cfg: JsAnalyticsConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Không đọc được config: {err}")))?;
            Ok(AnalyticsConfig::from(cfg))
        }
        _ => Ok(AnalyticsConfig::default()),
    }
}

fn snapshot_to_js(snapshot: &AnalyticsSnapshot) -> Result<JsValue, JsValue> {
    to_value(snapshot).map_err(|err| JsValue::from_str(&format!("Không serialize snapshot: {err}")))
}

fn format_analytics_error(err: AnalyticsError) -> String {
    format!("Analytics error: {err}")
}
