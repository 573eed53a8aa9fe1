use murmur_shared::Endpoint;
use rusqlite::{params, OptionalExtension};

use crate::database::{parse_endpoint, parse_timestamp, Database};
use crate::error::Result;
use crate::models::LocalIdentity;

impl Database {
    pub fn load_local_identity(&self) -> Result<Option<LocalIdentity>> {
        let identity = self
            .conn()
            .query_row(
                "SELECT secret_key, username, bio, endpoint, created_at
                 FROM local_identity WHERE id = 1",
                [],
                |row| {
                    let endpoint: String = row.get(3)?;
                    let created_at: String = row.get(4)?;
                    Ok(LocalIdentity {
                        secret_key_hex: row.get(0)?,
                        username: row.get(1)?,
                        bio: row.get(2)?,
                        endpoint: parse_endpoint(3, &endpoint)?,
                        created_at: parse_timestamp(4, &created_at)?,
                    })
                },
            )
            .optional()?;
        Ok(identity)
    }

    pub fn save_local_identity(&self, identity: &LocalIdentity) -> Result<()> {
        self.conn().execute(
            "INSERT INTO local_identity (id, secret_key, username, bio, endpoint, created_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                secret_key = excluded.secret_key,
                username   = excluded.username,
                bio        = excluded.bio,
                endpoint   = excluded.endpoint",
            params![
                identity.secret_key_hex,
                identity.username,
                identity.bio,
                identity.endpoint.as_str(),
                identity.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_local_profile(&self, username: &str, bio: &str, endpoint: &Endpoint) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE local_identity SET username = ?1, bio = ?2, endpoint = ?3 WHERE id = 1",
            params![username, bio, endpoint.as_str()],
        )?;
        Ok(affected > 0)
    }
}
