//! Persistent store schema.
//!
//! SQLite in WAL mode, matching the indexing requirements of the spec's
//! external-interfaces section: `transactions(payer_id, created_at desc)`,
//! `transactions(receiver, created_at)`, `risk_events(transaction_id)`,
//! `receiver_reputation(receiver)`.

pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS payers (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    trust_score INTEGER NOT NULL,
    known_device_set TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    payer_id TEXT NOT NULL,
    receiver TEXT NOT NULL,
    amount_paise INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    device_fingerprint TEXT NOT NULL,
    latitude REAL,
    longitude REAL,
    payment_mode TEXT NOT NULL,
    receiver_type TEXT NOT NULL,
    status TEXT NOT NULL,
    failed INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_transactions_payer_created
    ON transactions(payer_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_transactions_receiver_created
    ON transactions(receiver, created_at);

CREATE TABLE IF NOT EXISTS risk_events (
    transaction_id TEXT PRIMARY KEY,
    payer_id TEXT NOT NULL,
    triggered_rules TEXT NOT NULL DEFAULT '[]',
    rule_score REAL NOT NULL,
    ml_score REAL NOT NULL,
    final_score REAL NOT NULL,
    action TEXT NOT NULL,
    feature_vector TEXT NOT NULL DEFAULT '[]',
    assessed_at TEXT NOT NULL,
    ml_degraded INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (transaction_id) REFERENCES transactions(id)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS receiver_reputation (
    receiver TEXT PRIMARY KEY,
    total_transactions INTEGER NOT NULL DEFAULT 0,
    fraud_count INTEGER NOT NULL DEFAULT 0,
    chargeback_count INTEGER NOT NULL DEFAULT 0,
    successful_transactions INTEGER NOT NULL DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_updated TEXT NOT NULL
) WITHOUT ROWID;

-- Durable at-least-once queue for RiskEvent rows that failed to persist
-- on the hot path. Consumers key off transaction_id for idempotence.
CREATE TABLE IF NOT EXISTS retry_queue (
    transaction_id TEXT PRIMARY KEY,
    transaction_json TEXT NOT NULL,
    risk_event_json TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

-- Idempotency replay cache: a client-supplied key maps to the exact
-- response bytes returned the first time it was seen.
CREATE TABLE IF NOT EXISTS idempotency_keys (
    idempotency_key TEXT PRIMARY KEY,
    response_json TEXT NOT NULL,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

-- Dedup for outcome reporting: applying the same transaction_id's outcome
-- twice must mutate trust/reputation only once.
CREATE TABLE IF NOT EXISTS applied_outcomes (
    transaction_id TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
) WITHOUT ROWID;
"#;
