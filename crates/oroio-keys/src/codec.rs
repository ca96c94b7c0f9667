//! Usage record codec
//!
//! A usage block is a set of newline-separated `KEY=VALUE` pairs:
//!
//! ```text
//! BALANCE_NUM=12.5
//! TOTAL=100
//! USED=87.5
//! EXPIRES=2026-11-01
//! RAW=balance: $12.50 of $100.00
//! ```
//!
//! The cache file holds one block per key. The first two lines are a
//! header (format version, generation time) and are skipped; every other
//! line is `INDEX<TAB>BASE64(block)`. Decoding is best effort: a bad line
//! is dropped, never fatal.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Expiry value meaning "unknown"
pub const UNKNOWN_EXPIRY: &str = "?";

/// Version tag written on the first header line
pub const CACHE_VERSION: &str = "v1";

const HEADER_LINES: usize = 2;

/// Balance and expiry data for one key, as reported by the fetch command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub balance: Option<f64>,
    pub total: Option<f64>,
    pub used: Option<f64>,
    /// Expiry date, or `"?"` when unknown
    pub expires: String,
    /// Unparsed provider response, for diagnostics
    pub raw: String,
}

impl Default for Usage {
    fn default() -> Self {
        Self {
            balance: None,
            total: None,
            used: None,
            expires: UNKNOWN_EXPIRY.to_string(),
            raw: String::new(),
        }
    }
}

impl Usage {
    /// Remaining balance as a fraction of the total, if both are known
    pub fn remaining_ratio(&self) -> Option<f64> {
        match (self.balance, self.total) {
            (Some(balance), Some(total)) if total > 0.0 => Some(balance / total),
            _ => None,
        }
    }

    /// Used amount as a fraction of the total. A missing `used` counts as zero.
    pub fn used_ratio(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0.0 => Some(self.used.unwrap_or(0.0) / total),
            _ => None,
        }
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Decode a `KEY=VALUE` usage block. Unknown keys are ignored.
pub fn decode_usage(text: &str) -> Usage {
    let mut usage = Usage::default();

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        match key.trim() {
            "BALANCE_NUM" => usage.balance = parse_number(value),
            "TOTAL" => usage.total = parse_number(value),
            "USED" => usage.used = parse_number(value),
            "EXPIRES" => {
                let value = value.trim();
                usage.expires = if value.is_empty() {
                    UNKNOWN_EXPIRY.to_string()
                } else {
                    value.to_string()
                };
            }
            "RAW" => usage.raw = value.to_string(),
            _ => {}
        }
    }

    usage
}

/// Encode a usage block. Absent numbers are left out.
pub fn encode_usage(usage: &Usage) -> String {
    let mut lines = Vec::new();

    if let Some(balance) = usage.balance {
        lines.push(format!("BALANCE_NUM={}", balance));
    }
    if let Some(total) = usage.total {
        lines.push(format!("TOTAL={}", total));
    }
    if let Some(used) = usage.used {
        lines.push(format!("USED={}", used));
    }
    lines.push(format!("EXPIRES={}", usage.expires));
    if !usage.raw.is_empty() {
        lines.push(format!("RAW={}", usage.raw));
    }

    lines.join("\n")
}

/// Decode a whole cache file into usage records keyed by key index
pub fn decode_cache(text: &str) -> BTreeMap<usize, Usage> {
    let mut records = BTreeMap::new();

    for (lineno, line) in text.lines().enumerate().skip(HEADER_LINES) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match decode_cache_line(line) {
            Some((index, usage)) => {
                records.insert(index, usage);
            }
            None => debug!(line = lineno + 1, "skipping malformed cache line"),
        }
    }

    records
}

fn decode_cache_line(line: &str) -> Option<(usize, Usage)> {
    let (index, payload) = line.split_once('\t')?;

    let index = index.trim().parse::<usize>().ok().filter(|i| *i > 0)?;
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }

    let bytes = STANDARD.decode(payload).ok()?;
    let text = String::from_utf8(bytes).ok()?;

    Some((index, decode_usage(&text)))
}

/// Encode usage records into the cache file format
pub fn encode_cache(records: &BTreeMap<usize, Usage>, generated_at: i64) -> String {
    let mut out = format!("{}\n{}\n", CACHE_VERSION, generated_at);

    for (index, usage) in records {
        out.push_str(&format!(
            "{}\t{}\n",
            index,
            STANDARD.encode(encode_usage(usage))
        ));
    }

    out
}
