use chrono::Utc;
use serde_json::Value;
use tabscope_core::clock::to_rfc3339;
use tabscope_core::paths::tab_dir;
use tabscope_core::{Config, Paths};
use tabscope_monitor::tab::{CORRELATIONS_STEM, EVENTS_STEM};
use tabscope_storage::JsonlWriter;

/// Print the last `lines` records written today for `tab`.
pub async fn run(tab: &str, lines: usize, correlations: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let dir = tab_dir(&config.records_dir(&paths), tab);
    let stem = record_stem(correlations);

    let reader = JsonlWriter::new(&dir, stem);
    let records = reader.read_today()?;
    if records.is_empty() {
        println!("(No {} recorded today in {})", stem, dir.display());
        return Ok(());
    }

    let tail = last_n(&records, lines);
    println!(
        "{} {} for tab {} ({} of {})",
        Utc::now().format("%Y-%m-%d"),
        stem,
        tab,
        tail.len(),
        records.len()
    );
    println!();
    for record in tail {
        println!("{}", summarize(record));
    }
    Ok(())
}

/// File stem the tab monitor writes the requested record kind under.
fn record_stem(correlations: bool) -> &'static str {
    if correlations {
        CORRELATIONS_STEM
    } else {
        EVENTS_STEM
    }
}

fn last_n(records: &[Value], n: usize) -> &[Value] {
    &records[records.len().saturating_sub(n)..]
}

/// One line per record: correlations show severity and evidence, events
/// their type and compact JSON.
fn summarize(record: &Value) -> String {
    let at = record
        .get("timestamp")
        .and_then(|v| v.as_f64())
        .map(to_rfc3339)
        .unwrap_or_default();
    if let Some(severity) = record.get("severity").and_then(|v| v.as_str()) {
        let evidence = record.get("evidence").and_then(|v| v.as_str()).unwrap_or("");
        return format!("{} [{}] {}", at, severity, evidence);
    }
    let kind = record.get("type").and_then(|v| v.as_str()).unwrap_or("?");
    format!("{} {:<26} {}", at, kind, record)
}
