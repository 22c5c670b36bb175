//! UUIDv7 ids for app-generated rows.
//!
//! Refresh tokens, reset secrets and audit records are keyed by
//! timestamp-sortable ids generated here; `users` keeps PostgreSQL's
//! `gen_random_uuid()` default.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
