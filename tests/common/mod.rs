#![allow(dead_code)]

use gateway_ledger::ledger::entry::{EntryRequest, LedgerEntry};
use gateway_ledger::store::{DeletePolicy, SqliteLedgerStore};
use gateway_ledger::LedgerService;
use serde_json::json;

pub const TEST_SECRET: &str = "integration-test-secret-at-least-32-bytes";

/// Setup an in-memory SQLite ledger store for testing
pub async fn setup_test_store() -> SqliteLedgerStore {
    SqliteLedgerStore::in_memory(DeletePolicy::Allow)
        .await
        .expect("Failed to create test store")
}

pub fn create_test_service() -> LedgerService {
    LedgerService::new(TEST_SECRET)
}

/// A chat completion request with token usage and a model
pub fn chat_request(request_id: &str) -> EntryRequest {
    EntryRequest::new(request_id, "user-42", "/v1/chat/completions", "POST", 200, 183.25)
        .with_model("gpt-4o-mini")
        .with_tokens(120, 48)
}

/// Raw detector output, matched text included
pub fn detector_output() -> serde_json::Value {
    json!({
        "pii_detected": true,
        "entity_count": 2,
        "risk_level": "HIGH",
        "entities": [
            {"type": "EMAIL", "text": "alice@example.com", "start": 10, "end": 27, "risk_level": "MEDIUM"},
            {"type": "SSN", "text": "123-45-6789", "start": 40, "end": 51, "risk_level": "HIGH"}
        ]
    })
}

/// Create `count` chained entries through one service
pub fn create_test_chain(service: &LedgerService, count: usize) -> Vec<LedgerEntry> {
    (0..count)
        .map(|i| service.create_entry(chat_request(&format!("req-{}", i))))
        .collect()
}
