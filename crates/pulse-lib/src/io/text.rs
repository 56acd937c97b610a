use crate::signal::Sample;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// Parse a numeric series. Values may be separated by newlines, commas or
/// whitespace; blank lines and `#` comments are skipped.
pub fn parse_f64_series(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        for field in trimmed
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|f| !f.is_empty())
        {
            let val: f64 = field
                .parse()
                .with_context(|| format!("line {} is not f64: {}", idx + 1, field))?;
            out.push(val);
        }
    }
    if out.is_empty() {
        anyhow::bail!("no numeric samples found");
    }
    Ok(out)
}

pub fn read_f64_series(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_f64_series(&text)
}

#[derive(Debug, Deserialize)]
struct PpgRow {
    timestamp_ms: u64,
    value: f64,
}

/// Parse timestamped PPG samples from CSV with a `timestamp_ms,value` header.
///
/// Rows must be in non-decreasing timestamp order.
pub fn parse_ppg_csv<R: Read>(reader: R) -> Result<Vec<Sample>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);
    let mut out: Vec<Sample> = Vec::new();
    for (idx, row) in rdr.deserialize::<PpgRow>().enumerate() {
        let row = row.with_context(|| format!("bad ppg row {}", idx + 1))?;
        if let Some(prev) = out.last() {
            if row.timestamp_ms < prev.timestamp_ms {
                anyhow::bail!(
                    "ppg row {} goes back in time ({} < {})",
                    idx + 1,
                    row.timestamp_ms,
                    prev.timestamp_ms
                );
            }
        }
        out.push(Sample::new(row.value, row.timestamp_ms));
    }
    if out.is_empty() {
        anyhow::bail!("no ppg samples found");
    }
    Ok(out)
}

pub fn read_ppg_csv(path: &Path) -> Result<Vec<Sample>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    parse_ppg_csv(file).with_context(|| format!("failed to parse {}", path.display()))
}
