//! Webhook delivery ledger.
//!
//! Carriers retry webhooks they consider failed. Each delivery is keyed by
//! (call id, stage, delivery token); the first delivery claims the key and
//! stores the instruction it produced, and a repeat receives that stored
//! instruction instead of re-running the stage.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::CallStoreError;

/// Result of claiming a delivery key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryClaim {
    /// First time this key is seen; the caller should process the event.
    Fresh,
    /// Already processed; answer with the stored instruction.
    Replay(String),
    /// Claimed earlier but no instruction was stored (the first attempt died
    /// or is still running). The caller processes the event again.
    Unfinished,
}

/// Derives the ledger key for one delivery.
///
/// `token` distinguishes deliveries of the same stage within a call, such
/// as the recording id of successive support questions.
pub fn delivery_key(call_sid: &str, stage: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(call_sid.as_bytes());
    hasher.update(b"\n");
    hasher.update(stage.as_bytes());
    hasher.update(b"\n");
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Claims `key` for processing.
pub fn claim_delivery(
    conn: &Connection,
    key: &str,
    call_sid: &str,
    stage: &str,
) -> Result<DeliveryClaim, CallStoreError> {
    let inserted = conn.execute(
        "INSERT INTO webhook_deliveries (delivery_key, call_sid, stage)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(delivery_key) DO NOTHING",
        params![key, call_sid, stage],
    )?;
    if inserted > 0 {
        return Ok(DeliveryClaim::Fresh);
    }

    let stored: Option<Option<String>> = conn
        .query_row(
            "SELECT response_body FROM webhook_deliveries WHERE delivery_key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;

    Ok(match stored.flatten() {
        Some(body) => DeliveryClaim::Replay(body),
        None => DeliveryClaim::Unfinished,
    })
}

/// Stores the instruction produced for a claimed delivery.
pub fn store_delivery_response(
    conn: &Connection,
    key: &str,
    body: &str,
) -> Result<(), CallStoreError> {
    conn.execute(
        "UPDATE webhook_deliveries SET response_body = ?1 WHERE delivery_key = ?2",
        params![body, key],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_db;

    #[test]
    fn key_depends_on_every_part() {
        let base = delivery_key("CA1", "support-request", "RE1");
        assert_eq!(base, delivery_key("CA1", "support-request", "RE1"));
        assert_ne!(base, delivery_key("CA2", "support-request", "RE1"));
        assert_ne!(base, delivery_key("CA1", "follow-up", "RE1"));
        assert_ne!(base, delivery_key("CA1", "support-request", "RE2"));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn second_claim_replays_stored_response() {
        let conn = test_db();
        let key = delivery_key("CA1", "voice-auth", "RE1");

        assert_eq!(
            claim_delivery(&conn, &key, "CA1", "voice-auth").unwrap(),
            DeliveryClaim::Fresh
        );
        assert_eq!(
            claim_delivery(&conn, &key, "CA1", "voice-auth").unwrap(),
            DeliveryClaim::Unfinished
        );

        store_delivery_response(&conn, &key, "<Response/>").unwrap();
        assert_eq!(
            claim_delivery(&conn, &key, "CA1", "voice-auth").unwrap(),
            DeliveryClaim::Replay("<Response/>".to_string())
        );
    }
}
