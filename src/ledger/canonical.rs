//! Canonical Serialization
//!
//! Renders the covered fields of a ledger entry into the exact bytes that
//! get hashed. The layout is a key-sorted JSON object with `", "` and `": "`
//! separators, ASCII-only escaping and naive UTC ISO-8601 timestamps, so any
//! producer that follows it reproduces the same `log_hash`.
//!
//! IMPORTANT: every field except `log_hash`, `signature`, `archived` and
//! `archive_hash` is covered. A field left out here is a field that can be
//! tampered with silently.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::ledger::entry::LedgerEntry;

/// Canonical bytes of every covered field of `entry`
pub fn canonical_bytes(entry: &LedgerEntry) -> Vec<u8> {
    canonical_string(entry).into_bytes()
}

/// Canonical text form, mostly useful for debugging hash mismatches
pub fn canonical_string(entry: &LedgerEntry) -> String {
    let mut out = String::with_capacity(768);
    write_value(&mut out, &covered_fields(entry));
    out
}

/// Hex SHA-256 of the canonical bytes
pub fn content_hash(entry: &LedgerEntry) -> String {
    hex::encode(Sha256::digest(canonical_bytes(entry)))
}

fn covered_fields(entry: &LedgerEntry) -> Value {
    let entities: Vec<Value> = entry
        .pii_entities
        .iter()
        .map(|e| {
            json!({
                "type": e.entity_type,
                "risk_level": e.risk_level.map(|r| r.as_str()),
            })
        })
        .collect();

    json!({
        "id": entry.id,
        "request_id": entry.request_id,
        "timestamp": isoformat(&entry.timestamp),
        "created_at": isoformat(&entry.created_at),
        "user_id": entry.user_id,
        "user_hash": entry.user_hash,
        "endpoint": entry.endpoint,
        "method": entry.method,
        "model": entry.model,
        "status_code": entry.status_code,
        "latency_ms": entry.latency_ms,
        "prompt_tokens": entry.prompt_tokens,
        "completion_tokens": entry.completion_tokens,
        "total_tokens": entry.total_tokens,
        "pii_detected": entry.pii_detected,
        "pii_entity_count": entry.pii_entity_count,
        "pii_risk_level": entry.pii_risk_level.map(|r| r.as_str()),
        "pii_entities": entities,
        "request_blocked": entry.request_blocked,
        "rate_limited": entry.rate_limited,
        "auth_method": entry.auth_method,
        "chain_hash": entry.chain_hash,
        "sequence_number": entry.sequence_number,
    })
}

/// Naive UTC ISO-8601, microsecond fraction only when non-zero
pub fn isoformat(ts: &DateTime<Utc>) -> String {
    let base = ts.format("%Y-%m-%dT%H:%M:%S").to_string();
    match ts.timestamp_subsec_micros() {
        0 => base,
        micros => format!("{}.{:06}", base, micros),
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => out.push_str(&u.to_string()),
            (None, Some(i), _) => out.push_str(&i.to_string()),
            (None, None, Some(f)) => out.push_str(&format_float(f)),
            _ => out.push_str("null"),
        },
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(out, key);
                out.push_str(": ");
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

/// Shortest round-trip float text with a mandatory fraction
/// (`120.0`) and a signed two-digit exponent (`1e+16`, `1e-05`).
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    // Debug keeps the ".0" and switches to exponent form outside [1e-4, 1e16)
    let repr = format!("{:?}", f);
    match repr.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => repr,
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (c as u32) >= 0x7f => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
