use murmur_shared::{KeyId, MessageKind};
use rusqlite::params;

use crate::database::{parse_timestamp, Database};
use crate::error::{not_found, Result};
use crate::models::Message;

impl Database {
    /// Insert a message and return its row id.
    pub fn insert_message(&self, message: &Message) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (key_id, body, kind, msg_uuid, incoming, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.key_id.as_str(),
                message.body,
                message.kind.as_str(),
                message.msg_uuid,
                message.incoming as i32,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Messages exchanged with one contact, newest first.
    pub fn get_messages_for_key_id(
        &self,
        key_id: &KeyId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, key_id, body, kind, msg_uuid, incoming, created_at
             FROM messages
             WHERE key_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![key_id.as_str(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: i64) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, key_id, body, kind, msg_uuid, incoming, created_at
                 FROM messages WHERE id = ?1",
                params![id],
                row_to_message,
            )
            .map_err(not_found)
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let key_id: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let incoming: i32 = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(Message {
        id: row.get(0)?,
        key_id: KeyId::new(&key_id),
        body: row.get(2)?,
        kind: MessageKind::from_str_lossy(&kind),
        msg_uuid: row.get(4)?,
        incoming: incoming != 0,
        created_at: parse_timestamp(6, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn test_insert_and_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();
        let key_id = KeyId::new("0123456789abcdef");
        let now = Utc::now();

        for (i, body) in ["first", "second"].iter().enumerate() {
            db.insert_message(&Message {
                id: 0,
                key_id: key_id.clone(),
                body: body.to_string(),
                kind: MessageKind::Text,
                msg_uuid: String::new(),
                incoming: i == 0,
                created_at: now + Duration::seconds(i as i64),
            })
            .unwrap();
        }

        let messages = db.get_messages_for_key_id(&key_id, 10, 0).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, "second");
        assert!(!messages[0].incoming);
        assert!(messages[1].incoming);

        assert!(db.delete_message(messages[0].id).unwrap());
        assert!(matches!(
            db.get_message_by_id(messages[0].id),
            Err(crate::StoreError::NotFound)
        ));
    }
}
