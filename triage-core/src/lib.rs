//! Mô hình dữ liệu lõi cho bảng điều hành phân loại cấp cứu (triage).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Mức ESI (Emergency Severity Index), 1 là khẩn cấp nhất.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "i64", into = "u8")]
pub struct Esi(u8);

impl Esi {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub const ALL: [Esi; 5] = [Esi(1), Esi(2), Esi(3), Esi(4), Esi(5)];

    pub fn level(self) -> u8 {
        self.0
    }

    /// Phân nhóm nguy cơ suy ra từ ESI.
    pub fn risk_bucket(self) -> RiskBucket {
        RiskBucket::from_esi(self)
    }
}

impl TryFrom<i64> for Esi {
    type Error = EsiOutOfRange;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        if (i64::from(Esi::MIN)..=i64::from(Esi::MAX)).contains(&level) {
            Ok(Esi(level as u8))
        } else {
            Err(EsiOutOfRange(level))
        }
    }
}

impl From<Esi> for u8 {
    fn from(esi: Esi) -> Self {
        esi.0
    }
}

impl fmt::Display for Esi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ESI-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ESI {0} nằm ngoài khoảng 1-5")]
pub struct EsiOutOfRange(pub i64);

/// Nhóm nguy cơ ba tầng dùng cho báo cáo tổng hợp.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskBucket {
    High,
    Medium,
    Low,
}

impl RiskBucket {
    pub const ALL: [RiskBucket; 3] = [RiskBucket::High, RiskBucket::Medium, RiskBucket::Low];

    /// high: ESI <= 2, medium: ESI == 3, low: ESI >= 4.
    pub fn from_esi(esi: Esi) -> Self {
        match esi.level() {
            1 | 2 => RiskBucket::High,
            3 => RiskBucket::Medium,
            _ => RiskBucket::Low,
        }
    }

    /// Màu mức độ tương ứng mà dữ liệu đầu vào nên mang.
    pub fn expected_color(self) -> AcuityColor {
        match self {
            RiskBucket::High => AcuityColor::Critical,
            RiskBucket::Medium => AcuityColor::Urgent,
            RiskBucket::Low => AcuityColor::Minor,
        }
    }
}

/// Nhãn màu mức độ (critical/urgent/minor).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AcuityColor {
    Critical,
    Urgent,
    Minor,
}

impl AcuityColor {
    /// Đọc nhãn màu, chấp nhận cả tên màu hiển thị (red/yellow/green).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "critical" | "red" => Some(AcuityColor::Critical),
            "urgent" | "yellow" | "orange" | "amber" => Some(AcuityColor::Urgent),
            "minor" | "green" => Some(AcuityColor::Minor),
            _ => None,
        }
    }
}

/// Giá trị chia theo ba nhóm nguy cơ.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct RiskBreakdown<T> {
    pub high: T,
    pub medium: T,
    pub low: T,
}

impl<T> RiskBreakdown<T> {
    pub fn get(&self, bucket: RiskBucket) -> &T {
        match bucket {
            RiskBucket::High => &self.high,
            RiskBucket::Medium => &self.medium,
            RiskBucket::Low => &self.low,
        }
    }

    pub fn get_mut(&mut self, bucket: RiskBucket) -> &mut T {
        match bucket {
            RiskBucket::High => &mut self.high,
            RiskBucket::Medium => &mut self.medium,
            RiskBucket::Low => &mut self.low,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> RiskBreakdown<U> {
        RiskBreakdown {
            high: f(self.high),
            medium: f(self.medium),
            low: f(self.low),
        }
    }
}

/// Các loại chỉ số sống được thống kê.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VitalKind {
    HeartRate,
    SystolicBp,
    Spo2,
    Temperature,
    RespiratoryRate,
}

impl VitalKind {
    pub const ALL: [VitalKind; 5] = [
        VitalKind::HeartRate,
        VitalKind::SystolicBp,
        VitalKind::Spo2,
        VitalKind::Temperature,
        VitalKind::RespiratoryRate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            VitalKind::HeartRate => "Heart rate",
            VitalKind::SystolicBp => "Systolic BP",
            VitalKind::Spo2 => "SpO2",
            VitalKind::Temperature => "Temperature",
            VitalKind::RespiratoryRate => "Respiratory rate",
        }
    }

    /// Khoảng lâm sàng mặc định (nhiệt độ tính theo °F).
    pub fn default_range(self) -> ClinicalRange {
        match self {
            VitalKind::HeartRate => ClinicalRange::new(40.0, 180.0),
            VitalKind::SystolicBp => ClinicalRange::new(70.0, 200.0),
            VitalKind::Spo2 => ClinicalRange::new(80.0, 100.0),
            VitalKind::Temperature => ClinicalRange::new(95.0, 105.0),
            VitalKind::RespiratoryRate => ClinicalRange::new(8.0, 40.0),
        }
    }
}

/// Một chỉ số sống: đã đo hoặc đánh dấu rõ là chưa đo.
///
/// Không bao giờ điền giá trị giả cho chỉ số thiếu.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum VitalReading {
    Measured(f64),
    #[default]
    Unmeasured,
}

impl VitalReading {
    pub fn value(self) -> Option<f64> {
        match self {
            VitalReading::Measured(value) => Some(value),
            VitalReading::Unmeasured => None,
        }
    }
}

/// Bộ chỉ số sống của một bệnh nhân.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VitalSigns {
    readings: BTreeMap<VitalKind, VitalReading>,
}

impl VitalSigns {
    /// Chỉ số chưa có trong bảng được coi là chưa đo.
    pub fn get(&self, kind: VitalKind) -> VitalReading {
        self.readings.get(&kind).copied().unwrap_or_default()
    }

    /// Ghi nhận một chỉ số; giá trị đã đo không bị ghi đè bởi "chưa đo".
    pub fn set(&mut self, kind: VitalKind, reading: VitalReading) {
        match (self.get(kind), reading) {
            (VitalReading::Measured(_), VitalReading::Unmeasured) => {}
            _ => {
                self.readings.insert(kind, reading);
            }
        }
    }

    pub fn measured(&self) -> impl Iterator<Item = (VitalKind, f64)> + '_ {
        self.readings
            .iter()
            .filter_map(|(kind, reading)| reading.value().map(|value| (*kind, value)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SexCode {
    Male,
    Female,
    Other,
    #[default]
    Unknown,
}

impl SexCode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "m" | "male" => SexCode::Male,
            "f" | "female" => SexCode::Female,
            "o" | "other" => SexCode::Other,
            _ => SexCode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Demographics {
    pub age: Option<u32>,
    pub sex: SexCode,
}

/// Phương thức đến viện.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalMode {
    Ambulance,
    WalkIn,
    Referral,
    #[default]
    Unknown,
}

impl ArrivalMode {
    pub fn parse(value: &str) -> Self {
        let compact: String = value
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match compact.as_str() {
            "ambulance" | "ems" => ArrivalMode::Ambulance,
            "walkin" | "selfpresented" => ArrivalMode::WalkIn,
            "referral" | "referred" | "transfer" => ArrivalMode::Referral,
            _ => ArrivalMode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Arrival {
    /// Thiếu thời điểm đến thì bản ghi vẫn hợp lệ nhưng không vào biểu đồ lưu lượng.
    pub arrived_at: Option<DateTime<Utc>>,
    pub mode: ArrivalMode,
}

/// Quyết định phân loại do hệ thống bên ngoài tạo ra, chỉ đọc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageDecision {
    pub esi: Esi,
    pub confidence: Option<f64>,
    pub acuity_color: Option<AcuityColor>,
    pub specialists: Vec<String>,
    pub bay: Option<String>,
}

impl TriageDecision {
    pub fn risk_bucket(&self) -> RiskBucket {
        self.esi.risk_bucket()
    }

    /// Màu được dùng cho thống kê: luôn lấy theo ESI.
    pub fn effective_color(&self) -> AcuityColor {
        self.risk_bucket().expected_color()
    }
}

/// Bản ghi bệnh nhân chuẩn hóa, bất biến sau khi nhận vào.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientRecord {
    pub id: String,
    pub version: Option<u64>,
    pub demographics: Demographics,
    pub chief_complaint: String,
    pub vitals: VitalSigns,
    pub arrival: Arrival,
    pub decision: TriageDecision,
}

impl PatientRecord {
    pub fn risk_bucket(&self) -> RiskBucket {
        self.decision.risk_bucket()
    }

    /// Cảnh báo khi màu được cung cấp không khớp với ESI.
    pub fn acuity_warning(&self) -> Option<DataIntegrityWarning> {
        let supplied = self.decision.acuity_color?;
        let expected = self.decision.effective_color();
        (supplied != expected).then(|| DataIntegrityWarning {
            record_id: self.id.clone(),
            esi: self.decision.esi,
            supplied,
            expected,
        })
    }
}

/// Khoảng lâm sàng [min, max] của một chỉ số sống.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ClinicalRange {
    pub min: f64,
    pub max: f64,
}

impl ClinicalRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Ánh xạ tuyến tính về [0, 100] rồi kẹp biên.
    pub fn normalize(&self, value: f64) -> f64 {
        let scaled = (value - self.min) / (self.max - self.min) * 100.0;
        if scaled.is_nan() {
            return 0.0;
        }
        scaled.clamp(0.0, 100.0)
    }
}

/// Từ dừng mặc định khi đếm từ khóa lý do đến khám.
pub const DEFAULT_STOP_WORDS: [&str; 40] = [
    "and", "the", "with", "for", "from", "since", "has", "have", "had", "was", "were", "are",
    "this", "that", "not", "but", "after", "about", "into", "over", "very", "some", "than",
    "then", "there", "their", "they", "been", "being", "also", "while", "when", "patient",
    "reports", "reported", "complains", "complaining", "presents", "presenting", "states",
];

/// Giới hạn số khoảng của biểu đồ lưu lượng.
pub const MAX_FLOW_BUCKETS: u64 = 10_080;

/// Các mốc mặc định của biểu đồ độ tin cậy (7 khoảng).
pub const DEFAULT_CONFIDENCE_EDGES: [f64; 8] = [60.0, 70.0, 75.0, 80.0, 85.0, 90.0, 95.0, 100.0];

/// Cấu hình các bộ tổng hợp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Mốc biên của biểu đồ độ tin cậy, tăng dần.
    pub confidence_bucket_edges: Vec<f64>,
    pub vital_clinical_ranges: BTreeMap<VitalKind, ClinicalRange>,
    /// Độ dài cửa sổ lưu lượng (giờ).
    pub flow_window_hours: u32,
    pub flow_bucket_width_minutes: u32,
    pub keyword_top_n: usize,
    /// Luôn ở dạng viết thường như token, kể cả khi đọc từ file cấu hình.
    #[serde(deserialize_with = "deserialize_stop_words")]
    pub stop_words: BTreeSet<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            confidence_bucket_edges: DEFAULT_CONFIDENCE_EDGES.to_vec(),
            vital_clinical_ranges: VitalKind::ALL
                .iter()
                .map(|kind| (*kind, kind.default_range()))
                .collect(),
            flow_window_hours: 24,
            flow_bucket_width_minutes: 60,
            keyword_top_n: 12,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// Chuẩn hóa từ dừng giống cách token hóa: bỏ khoảng trắng, viết thường.
pub fn normalize_stop_words<I, S>(words: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|word| word.as_ref().trim().to_lowercase())
        .filter(|word| !word.is_empty())
        .collect()
}

fn deserialize_stop_words<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<String>::deserialize(deserializer).map(normalize_stop_words)
}

impl AnalyticsConfig {
    /// Khoảng lâm sàng của một chỉ số, quay về mặc định nếu cấu hình bỏ trống.
    pub fn clinical_range(&self, kind: VitalKind) -> ClinicalRange {
        self.vital_clinical_ranges
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_range())
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        let edges = &self.confidence_bucket_edges;
        if edges.len() < 2 {
            return Err(AnalyticsError::InvalidConfig(
                "confidence_bucket_edges cần ít nhất 2 mốc".to_string(),
            ));
        }
        if edges.iter().any(|edge| !edge.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalyticsError::InvalidConfig(
                "confidence_bucket_edges phải tăng dần nghiêm ngặt".to_string(),
            ));
        }

        for (kind, range) in &self.vital_clinical_ranges {
            if !range.min.is_finite() || !range.max.is_finite() || range.max <= range.min {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "khoảng lâm sàng của {} không hợp lệ",
                    kind.label()
                )));
            }
        }

        if self.flow_window_hours == 0 || self.flow_bucket_width_minutes == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "cửa sổ lưu lượng và độ rộng khoảng phải lớn hơn 0".to_string(),
            ));
        }
        if (u64::from(self.flow_window_hours) * 60) % u64::from(self.flow_bucket_width_minutes) != 0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "{} phút không chia hết cửa sổ {} giờ",
                self.flow_bucket_width_minutes, self.flow_window_hours
            )));
        }
        if u64::from(self.flow_window_hours) * 60 / u64::from(self.flow_bucket_width_minutes)
            > MAX_FLOW_BUCKETS
        {
            return Err(AnalyticsError::InvalidConfig(format!(
                "cửa sổ lưu lượng vượt quá {MAX_FLOW_BUCKETS} khoảng"
            )));
        }

        if self.keyword_top_n == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "keyword_top_n phải lớn hơn 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Trường số có miền giá trị xác định.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RangeField {
    Esi,
    Confidence,
}

impl fmt::Display for RangeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeField::Esi => write!(f, "esi"),
            RangeField::Confidence => write!(f, "confidence"),
        }
    }
}

/// Giá trị nằm ngoài miền xác định của trường.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("Bản ghi {record_id}: {field} = {value} nằm ngoài [{min}, {max}]")]
pub struct OutOfRangeValue {
    pub record_id: String,
    pub field: RangeField,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Màu mức độ không khớp với ESI; ESI luôn được ưu tiên.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataIntegrityWarning {
    pub record_id: String,
    pub esi: Esi,
    pub supplied: AcuityColor,
    pub expected: AcuityColor,
}

/// Tổng hợp bất thường theo từng bản ghi trong một lần tính.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RecomputeDiagnostics {
    /// Số bản ghi bị loại vì không có quyết định/ESI dùng được.
    pub ineligible: usize,
    pub missing_confidence: usize,
    pub out_of_range: Vec<OutOfRangeValue>,
    pub integrity_warnings: Vec<DataIntegrityWarning>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AcuityCounts {
    pub critical: usize,
    pub urgent: usize,
    pub minor: usize,
}

impl AcuityCounts {
    pub fn increment(&mut self, color: AcuityColor) {
        match color {
            AcuityColor::Critical => self.critical += 1,
            AcuityColor::Urgent => self.urgent += 1,
            AcuityColor::Minor => self.minor += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ArrivalModeCounts {
    pub ambulance: usize,
    pub walk_in: usize,
    pub referral: usize,
    pub unknown: usize,
}

impl ArrivalModeCounts {
    pub fn increment(&mut self, mode: ArrivalMode) {
        match mode {
            ArrivalMode::Ambulance => self.ambulance += 1,
            ArrivalMode::WalkIn => self.walk_in += 1,
            ArrivalMode::Referral => self.referral += 1,
            ArrivalMode::Unknown => self.unknown += 1,
        }
    }
}

/// Số lượng tổng theo nhóm nguy cơ, màu và phương thức đến.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Totals {
    pub by_risk: RiskBreakdown<usize>,
    pub by_acuity: AcuityCounts,
    pub by_arrival_mode: ArrivalModeCounts,
    /// Trung bình độ tin cậy hợp lệ, 0 khi không có mẫu.
    pub mean_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EsiHistogram {
    pub counts: [usize; 5],
}

impl EsiHistogram {
    pub fn get(&self, esi: Esi) -> usize {
        self.counts[usize::from(esi.level() - 1)]
    }

    pub fn increment(&mut self, esi: Esi) {
        self.counts[usize::from(esi.level() - 1)] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Một khoảng của biểu đồ: [lower, upper), riêng khoảng cuối đóng hai đầu.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramBucket {
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    pub upper_inclusive: bool,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfidenceHistogram {
    pub buckets: Vec<HistogramBucket>,
}

impl ConfidenceHistogram {
    /// Tra số lượng theo nhãn, ví dụ "90-95%".
    pub fn count_for(&self, label: &str) -> Option<usize> {
        self.buckets
            .iter()
            .find(|bucket| bucket.label == label)
            .map(|bucket| bucket.count)
    }

    pub fn total(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.count).sum()
    }
}

/// Một điểm trên biểu đồ radar chỉ số sống.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct RadarPoint {
    /// Trung bình thô; `None` khi nhóm không có giá trị đo nào.
    pub mean: Option<f64>,
    /// Giá trị chuẩn hóa trong [0, 100]; 0 khi không có mẫu.
    pub normalized: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VitalRadar {
    pub kind: VitalKind,
    pub range: ClinicalRange,
    pub buckets: RiskBreakdown<RadarPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentMetrics {
    pub name: String,
    pub count: usize,
    pub high_risk_count: usize,
    pub mean_confidence: f64,
}

/// Một khoảng thời gian nửa mở [start, end) của biểu đồ lưu lượng.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub arrivals: usize,
    pub discharges: usize,
    pub high_risk_arrivals: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordCount {
    pub keyword: String,
    pub count: usize,
}

/// Ảnh chụp hoàn chỉnh các chỉ số tổng hợp, bất biến sau khi phát hành.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsSnapshot {
    /// Số thứ tự phát hành, tăng dần; 0 cho lần tính thuần túy.
    pub sequence: u64,
    pub generated_at: DateTime<Utc>,
    /// Mốc neo của cửa sổ lưu lượng.
    pub as_of: DateTime<Utc>,
    pub eligible_records: usize,
    pub totals: Totals,
    pub esi_histogram: EsiHistogram,
    pub confidence_histogram: ConfidenceHistogram,
    pub vitals_radar: Vec<VitalRadar>,
    pub department_metrics: Vec<DepartmentMetrics>,
    pub hourly_flow: Vec<FlowBucket>,
    pub keyword_frequency: Vec<KeywordCount>,
    pub diagnostics: RecomputeDiagnostics,
}

impl AnalyticsSnapshot {
    pub fn department(&self, name: &str) -> Option<&DepartmentMetrics> {
        self.department_metrics.iter().find(|dept| dept.name == name)
    }

    /// Các khoa đông nhất (danh sách đã được sắp xếp sẵn).
    pub fn top_departments(&self, n: usize) -> &[DepartmentMetrics] {
        &self.department_metrics[..n.min(self.department_metrics.len())]
    }

    pub fn radar_for(&self, kind: VitalKind) -> Option<&VitalRadar> {
        self.vitals_radar.iter().find(|radar| radar.kind == kind)
    }

    pub fn flow_bucket_at(&self, at: DateTime<Utc>) -> Option<&FlowBucket> {
        self.hourly_flow
            .iter()
            .find(|bucket| bucket.start <= at && at < bucket.end)
    }
}

/// Lỗi chung của bộ tổng hợp.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Bản ghi {record_id} không đủ điều kiện thống kê: {reason}")]
    IneligibleRecord { record_id: String, reason: String },
    #[error(transparent)]
    OutOfRangeValue(#[from] OutOfRangeValue),
    #[error("Dữ liệu đầu vào thiếu thông tin tối thiểu")]
    MissingData,
    #[error("Cấu hình không hợp lệ: {0}")]
    InvalidConfig(String),
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
    #[error("Tính toán snapshot thất bại: {0}")]
    RecomputeFailure(String),
}
