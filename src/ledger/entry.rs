//! Ledger Entry
//!
//! Defines the audit record written once per gateway request, the
//! anonymized PII summary it carries, and the request shape callers
//! hand to the ledger service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Literal mixed into the signature input of the first entry in a chain.
pub const GENESIS_MARKER: &str = "genesis";

/// Number of hex characters kept for `user_hash`.
pub const USER_HASH_LEN: usize = 8;

/// Auth method recorded when the caller doesn't supply one.
pub const DEFAULT_AUTH_METHOD: &str = "jwt";

/// Risk classification reported by the PII detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PiiRiskLevel {
    High,
    Medium,
    Low,
}

impl PiiRiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiRiskLevel::High => "HIGH",
            PiiRiskLevel::Medium => "MEDIUM",
            PiiRiskLevel::Low => "LOW",
        }
    }
}

impl fmt::Display for PiiRiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PiiRiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Ok(PiiRiskLevel::High),
            "MEDIUM" => Ok(PiiRiskLevel::Medium),
            "LOW" => Ok(PiiRiskLevel::Low),
            other => Err(format!("unknown PII risk level: {}", other)),
        }
    }
}

/// Anonymized PII finding: the entity type and its risk, never the matched text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub risk_level: Option<PiiRiskLevel>,
}

impl PiiEntity {
    pub fn new(entity_type: impl Into<String>, risk_level: Option<PiiRiskLevel>) -> Self {
        Self {
            entity_type: entity_type.into(),
            risk_level,
        }
    }
}

/// PII detection outcome as consumed by the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiResult {
    pub pii_detected: bool,
    pub entity_count: u32,
    pub risk_level: Option<PiiRiskLevel>,
    pub entities: Vec<PiiEntity>,
}

impl PiiResult {
    /// Build a summary from the detector's loosely-typed JSON output.
    ///
    /// Only `type` and `risk_level` survive from each entity; matched text,
    /// offsets and scores are dropped. Missing or malformed fields fall back
    /// to absent/zero so a strange detector payload never blocks the audit write.
    pub fn from_detector_value(value: &Value) -> Self {
        let entities: Vec<PiiEntity> = value
            .get("entities")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let entity_type = item.get("type").and_then(Value::as_str)?;
                        Some(PiiEntity::new(entity_type, parse_risk(item.get("risk_level"))))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let entity_count = value
            .get("entity_count")
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0);

        Self {
            pii_detected: value
                .get("pii_detected")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            entity_count,
            risk_level: parse_risk(value.get("risk_level")),
            entities,
        }
    }
}

fn parse_risk(value: Option<&Value>) -> Option<PiiRiskLevel> {
    value.and_then(Value::as_str).and_then(|s| s.parse().ok())
}

/// Everything the ledger needs to know about one processed request
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub request_id: String,
    pub user_id: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub model: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub pii: Option<PiiResult>,
    pub request_blocked: bool,
    pub rate_limited: bool,
    pub auth_method: String,
    pub previous_hash: Option<String>,
}

impl EntryRequest {
    pub fn new(
        request_id: impl Into<String>,
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status_code: u16,
        latency_ms: f64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            status_code,
            latency_ms,
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            pii: None,
            request_blocked: false,
            rate_limited: false,
            auth_method: DEFAULT_AUTH_METHOD.to_string(),
            previous_hash: None,
        }
    }

    /// Fresh correlation id for callers that didn't receive one upstream
    pub fn generated_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tokens(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.prompt_tokens = prompt_tokens;
        self.completion_tokens = completion_tokens;
        self
    }

    pub fn with_pii(mut self, pii: PiiResult) -> Self {
        self.pii = Some(pii);
        self
    }

    pub fn blocked(mut self, request_blocked: bool) -> Self {
        self.request_blocked = request_blocked;
        self
    }

    pub fn rate_limited(mut self, rate_limited: bool) -> Self {
        self.rate_limited = rate_limited;
        self
    }

    pub fn with_auth_method(mut self, auth_method: impl Into<String>) -> Self {
        self.auth_method = auth_method.into();
        self
    }

    /// Link to an explicit previous hash instead of the writer's cursor.
    pub fn chained_to(mut self, previous_hash: impl Into<String>) -> Self {
        self.previous_hash = Some(previous_hash.into());
        self
    }
}

/// Immutable audit record with content hash, signature and chain link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub user_hash: String,
    pub endpoint: String,
    pub method: String,
    pub model: Option<String>,
    pub status_code: u16,
    pub latency_ms: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub pii_detected: bool,
    pub pii_entity_count: u32,
    pub pii_risk_level: Option<PiiRiskLevel>,
    pub pii_entities: Vec<PiiEntity>,
    pub request_blocked: bool,
    pub rate_limited: bool,
    pub auth_method: String,
    pub log_hash: String,
    pub signature: String,
    pub chain_hash: Option<String>,
    pub sequence_number: u64,
    pub archived: bool,
    pub archive_hash: Option<String>,
}

impl LedgerEntry {
    pub fn is_genesis(&self) -> bool {
        self.chain_hash.is_none()
    }

    /// Chain hash as it appears in the signature input
    pub fn chain_marker(&self) -> &str {
        self.chain_hash.as_deref().unwrap_or(GENESIS_MARKER)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {} {} {} -> {} ({})",
            self.sequence_number,
            self.method,
            self.endpoint,
            self.user_hash,
            self.status_code,
            short(&self.log_hash, 16)
        )
    }
}

/// Short, one-way display hash of a user identifier
pub fn user_hash(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(USER_HASH_LEN);
    hex
}

/// Prefix of a hash for log lines and error messages
pub(crate) fn short(value: &str, len: usize) -> &str {
    match value.char_indices().nth(len) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_hash_is_short_and_stable() {
        let h1 = user_hash("u1");
        assert_eq!(h1.len(), USER_HASH_LEN);
        assert_eq!(h1, user_hash("u1"));
        assert_ne!(h1, user_hash("u2"));
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_risk_level_parsing() {
        assert_eq!("HIGH".parse::<PiiRiskLevel>(), Ok(PiiRiskLevel::High));
        assert_eq!("medium".parse::<PiiRiskLevel>(), Ok(PiiRiskLevel::Medium));
        assert!("CRITICAL".parse::<PiiRiskLevel>().is_err());
        assert_eq!(PiiRiskLevel::Low.to_string(), "LOW");
    }

    #[test]
    fn test_detector_value_drops_raw_text() {
        let raw = json!({
            "pii_detected": true,
            "risk_level": "HIGH",
            "entities": [
                {"type": "EMAIL_ADDRESS", "text": "jane@example.com", "start": 4, "end": 20, "risk_level": "MEDIUM"},
                {"type": "US_SSN", "value": "123-45-6789", "risk_level": "HIGH"}
            ]
        });

        let pii = PiiResult::from_detector_value(&raw);
        assert!(pii.pii_detected);
        assert_eq!(pii.risk_level, Some(PiiRiskLevel::High));
        assert_eq!(pii.entity_count, 0);
        assert_eq!(
            pii.entities,
            vec![
                PiiEntity::new("EMAIL_ADDRESS", Some(PiiRiskLevel::Medium)),
                PiiEntity::new("US_SSN", Some(PiiRiskLevel::High)),
            ]
        );

        let rendered = serde_json::to_string(&pii).unwrap();
        assert!(!rendered.contains("jane@example.com"));
        assert!(!rendered.contains("123-45-6789"));
    }

    #[test]
    fn test_missing_entity_count_is_zero() {
        let pii = PiiResult::from_detector_value(&json!({
            "pii_detected": true,
            "entities": [{"type": "PERSON"}, {"type": "LOCATION"}]
        }));
        assert_eq!(pii.entity_count, 0);
        assert_eq!(pii.entities.len(), 2);

        let counted = PiiResult::from_detector_value(&json!({"entity_count": 5, "entities": []}));
        assert_eq!(counted.entity_count, 5);
    }

    #[test]
    fn test_detector_value_degrades_gracefully() {
        let pii = PiiResult::from_detector_value(&json!({
            "pii_detected": "yes",
            "entity_count": -3,
            "risk_level": "EXTREME",
            "entities": [{"risk_level": "LOW"}, 42]
        }));

        assert_eq!(pii, PiiResult::default());
        assert_eq!(PiiResult::from_detector_value(&Value::Null), PiiResult::default());
    }

    #[test]
    fn test_entity_serializes_type_key() {
        let entity = PiiEntity::new("PHONE_NUMBER", None);
        assert_eq!(
            serde_json::to_value(&entity).unwrap(),
            json!({"type": "PHONE_NUMBER", "risk_level": null})
        );
    }

    #[test]
    fn test_request_builder_defaults() {
        let req = EntryRequest::new("r1", "u1", "/v1/chat/completions", "POST", 200, 120.5);
        assert_eq!(req.auth_method, DEFAULT_AUTH_METHOD);
        assert_eq!(req.prompt_tokens, 0);
        assert!(req.previous_hash.is_none());

        let req = req.with_tokens(10, 20).blocked(true).chained_to("abc");
        assert_eq!(req.completion_tokens, 20);
        assert!(req.request_blocked);
        assert_eq!(req.previous_hash.as_deref(), Some("abc"));
        assert_ne!(EntryRequest::generated_id(), EntryRequest::generated_id());
    }

    #[test]
    fn test_short_prefix() {
        assert_eq!(short("abcdef", 3), "abc");
        assert_eq!(short("ab", 16), "ab");
    }
}
