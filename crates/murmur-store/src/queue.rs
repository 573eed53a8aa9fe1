use chrono::{DateTime, Utc};
use murmur_shared::Endpoint;
use rusqlite::params;

use crate::database::{parse_endpoint, parse_optional_timestamp, parse_timestamp, Database};
use crate::error::{not_found, Result};
use crate::models::QueuedEvent;

const QUEUE_COLUMNS: &str = "id, body, endpoint, created_at, last_relayed, relay_tries";

impl Database {
    /// Persist a sealed payload for later delivery.
    pub fn enqueue_event(&self, body: &[u8], endpoint: &Endpoint) -> Result<QueuedEvent> {
        let created_at = Utc::now();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO queued_events (body, endpoint, created_at, relay_tries)
                 VALUES (?1, ?2, ?3, 0)",
                params![body, endpoint.as_str(), created_at.to_rfc3339()],
            )?;
            conn.last_insert_rowid()
        };

        Ok(QueuedEvent {
            id,
            body: body.to_vec(),
            endpoint: endpoint.clone(),
            created_at,
            last_relayed: None,
            relay_tries: 0,
        })
    }

    pub fn get_queued_event(&self, id: i64) -> Result<QueuedEvent> {
        self.conn()
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM queued_events WHERE id = ?1"),
                params![id],
                row_to_queued_event,
            )
            .map_err(not_found)
    }

    /// Up to `limit` queued events in random order.
    pub fn random_queued_events(&self, limit: u32) -> Result<Vec<QueuedEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queued_events ORDER BY RANDOM() LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], row_to_queued_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn queued_events_for_endpoint(&self, endpoint: &Endpoint) -> Result<Vec<QueuedEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queued_events WHERE endpoint = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![endpoint.as_str()], row_to_queued_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Stamp a relay attempt: set `last_relayed` and bump `relay_tries`.
    pub fn record_relay_attempt(&self, event: &mut QueuedEvent, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE queued_events
             SET last_relayed = ?1, relay_tries = relay_tries + 1
             WHERE id = ?2",
            params![at.to_rfc3339(), event.id],
        )?;
        event.last_relayed = Some(at);
        event.relay_tries = event.relay_tries.saturating_add(1);
        Ok(())
    }

    pub fn delete_queued_event(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM queued_events WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn count_queued_events(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM queued_events", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_queued_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedEvent> {
    let endpoint: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let last_relayed: Option<String> = row.get(4)?;
    let relay_tries: i64 = row.get(5)?;

    Ok(QueuedEvent {
        id: row.get(0)?,
        body: row.get(1)?,
        endpoint: parse_endpoint(2, &endpoint)?,
        created_at: parse_timestamp(3, &created_at)?,
        last_relayed: parse_optional_timestamp(4, last_relayed)?,
        relay_tries: u32::try_from(relay_tries).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_attempt_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();
        let endpoint = Endpoint::parse("tor://peer.onion/bob").unwrap();

        let mut evt = db.enqueue_event(b"sealed", &endpoint).unwrap();
        assert_eq!(evt.relay_tries, 0);

        db.record_relay_attempt(&mut evt, Utc::now()).unwrap();
        db.record_relay_attempt(&mut evt, Utc::now()).unwrap();
        let stored = db.get_queued_event(evt.id).unwrap();
        assert_eq!(stored.relay_tries, 2);
        assert!(stored.last_relayed.is_some());
        assert_eq!(stored.body, b"sealed");

        assert!(db.delete_queued_event(evt.id).unwrap());
        assert!(!db.delete_queued_event(evt.id).unwrap());
        assert_eq!(db.count_queued_events().unwrap(), 0);
    }

    #[test]
    fn test_random_batch_is_limited() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();
        let endpoint = Endpoint::parse("local://127.0.0.1:3893/a").unwrap();
        for _ in 0..7 {
            db.enqueue_event(b"x", &endpoint).unwrap();
        }

        assert_eq!(db.random_queued_events(5).unwrap().len(), 5);
        assert_eq!(db.queued_events_for_endpoint(&endpoint).unwrap().len(), 7);
    }
}
