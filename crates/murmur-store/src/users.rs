use murmur_shared::KeyId;
use rusqlite::params;

use crate::database::{parse_endpoint, parse_timestamp, Database};
use crate::error::{not_found, Result};
use crate::models::UserInfo;

const USER_COLUMNS: &str = "id, username, public_key, fingerprint, key_id, endpoint, created_at";

impl Database {
    /// Insert a contact, or update the existing row with the same fingerprint.
    ///
    /// Returns the stored row. `created_at` of an existing row is preserved.
    pub fn upsert_user(&self, user: &UserInfo) -> Result<UserInfo> {
        self.conn().execute(
            "INSERT INTO users (username, public_key, fingerprint, key_id, endpoint, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(fingerprint) DO UPDATE SET
                username   = excluded.username,
                public_key = excluded.public_key,
                key_id     = excluded.key_id,
                endpoint   = excluded.endpoint",
            params![
                user.username,
                user.public_key,
                user.fingerprint,
                user.key_id.as_str(),
                user.endpoint.as_str(),
                user.created_at.to_rfc3339(),
            ],
        )?;
        self.get_user_by_fingerprint(&user.fingerprint)
    }

    pub fn get_user_by_fingerprint(&self, fingerprint: &str) -> Result<UserInfo> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE fingerprint = ?1"),
                params![fingerprint.to_ascii_lowercase()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_by_key_id(&self, key_id: &KeyId) -> Result<UserInfo> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE key_id = ?1 LIMIT 1"),
                params![key_id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn list_users(&self) -> Result<Vec<UserInfo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn update_user_key_id(&self, id: i64, key_id: &KeyId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET key_id = ?1 WHERE id = ?2",
            params![key_id.as_str(), id],
        )?;
        Ok(affected > 0)
    }

    /// Remove a contact together with its messages and undelivered events.
    pub fn purge_user(&self, user: &UserInfo) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE key_id = ?1",
            params![user.key_id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM queued_events WHERE endpoint = ?1",
            params![user.endpoint.as_str()],
        )?;
        let affected = tx.execute("DELETE FROM users WHERE id = ?1", params![user.id])?;
        tx.commit()?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserInfo> {
    let key_id: String = row.get(4)?;
    let endpoint: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(UserInfo {
        id: row.get(0)?,
        username: row.get(1)?,
        public_key: row.get(2)?,
        fingerprint: row.get(3)?,
        key_id: KeyId::new(&key_id),
        endpoint: parse_endpoint(5, &endpoint)?,
        created_at: parse_timestamp(6, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use murmur_shared::Endpoint;

    use super::*;

    fn contact(fingerprint: &str, name: &str) -> UserInfo {
        UserInfo {
            id: 0,
            username: name.to_string(),
            public_key: format!("PK-{fingerprint}"),
            fingerprint: fingerprint.to_string(),
            key_id: KeyId::new(fingerprint),
            endpoint: Endpoint::parse("i2p://peer.b32.i2p/alice").unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_is_idempotent_by_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let first = db.upsert_user(&contact("aaaabbbbccccddddeeee0123456789abcdef", "alice")).unwrap();
        let second = db.upsert_user(&contact("aaaabbbbccccddddeeee0123456789abcdef", "alice2")).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username, "alice2");
        assert_eq!(db.list_users().unwrap().len(), 1);
        assert_eq!(second.key_id.as_str(), "0123456789abcdef");
    }

    #[test]
    fn test_lookup_by_key_id_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();
        let stored = db.upsert_user(&contact("ffff0123456789abcdef", "bob")).unwrap();

        let found = db.get_user_by_key_id(&KeyId::new("0123456789abcdef")).unwrap();
        assert_eq!(found.id, stored.id);
        assert!(matches!(
            db.get_user_by_key_id(&KeyId::new("ffffffffffffffff")),
            Err(crate::StoreError::NotFound)
        ));
    }

    #[test]
    fn test_purge_user() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();
        let stored = db.upsert_user(&contact("ffff0123456789abcdef", "bob")).unwrap();
        db.enqueue_event(b"x", &stored.endpoint).unwrap();

        assert!(db.purge_user(&stored).unwrap());
        assert!(db.list_users().unwrap().is_empty());
        assert_eq!(db.count_queued_events().unwrap(), 0);
    }
}
