use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use triage_analytics::{compute_snapshot, AnalyticsInput};
use triage_core::{AnalyticsConfig, AnalyticsSnapshot, RiskBucket};

#[derive(Parser, Debug)]
#[command(
    name = "triage-cli",
    about = "Tổng hợp chỉ số vận hành phân loại cấp cứu từ lô bản ghi JSON."
)]
struct Args {
    /// Đường dẫn tới file JSON: mảng bản ghi hoặc `{ records, discharges, as_of }`.
    #[arg(short, long)]
    input: PathBuf,

    /// File cấu hình JSON (chỉ cần các trường muốn ghi đè).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// In toàn bộ snapshot dạng JSON thay vì bản tóm tắt.
    #[arg(long)]
    json: bool,

    #[arg(long)]
    window_hours: Option<u32>,

    #[arg(long)]
    top_n: Option<usize>,

    /// Mức log, ví dụ `debug` hoặc `triage_analytics=trace`. Mặc định lấy từ RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref())?;

    let data = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Không đọc được file {:?}", args.input))?;
    let input = AnalyticsInput::from_json_str(&data)
        .with_context(|| format!("File {:?} không phải lô bản ghi hợp lệ", args.input))?;

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AnalyticsConfig::default(),
    };
    if let Some(hours) = args.window_hours {
        config.flow_window_hours = hours;
    }
    if let Some(top_n) = args.top_n {
        config.keyword_top_n = top_n;
    }

    let snapshot = compute_snapshot(&input, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&snapshot);
    }

    Ok(())
}

fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("Mức log không hợp lệ: {level}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AnalyticsConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Không đọc được file cấu hình {path:?}"))?;
    let config: AnalyticsConfig = serde_json::from_str(&raw)
        .with_context(|| format!("File cấu hình {path:?} không hợp lệ"))?;
    tracing::debug!(?path, "loaded analytics config");
    Ok(config)
}

fn print_summary(snapshot: &AnalyticsSnapshot) {
    let totals = &snapshot.totals;
    println!(
        "Generated at: {}\nWindow anchor: {}\nEligible records: {}\nRisk: high {} / medium {} / low {}\nMean confidence: {:.1}",
        snapshot.generated_at,
        snapshot.as_of,
        snapshot.eligible_records,
        totals.by_risk.get(RiskBucket::High),
        totals.by_risk.get(RiskBucket::Medium),
        totals.by_risk.get(RiskBucket::Low),
        totals.mean_confidence,
    );

    println!("Top departments:");
    for dept in snapshot.top_departments(5) {
        println!(
            "  {:<24} {:>4} (high-risk {}, confidence {:.1})",
            dept.name, dept.count, dept.high_risk_count, dept.mean_confidence
        );
    }

    let keywords: Vec<String> = snapshot
        .keyword_frequency
        .iter()
        .map(|k| format!("{} ({})", k.keyword, k.count))
        .collect();
    println!("Keywords: {}", keywords.join(", "));

    let diagnostics = &snapshot.diagnostics;
    println!(
        "Ineligible: {}  Out of range: {}  Acuity mismatches: {}  Missing confidence: {}",
        diagnostics.ineligible,
        diagnostics.out_of_range.len(),
        diagnostics.integrity_warnings.len(),
        diagnostics.missing_confidence
    );
}
