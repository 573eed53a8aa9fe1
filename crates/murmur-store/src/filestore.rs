use murmur_shared::KeyId;
use rusqlite::params;
use uuid::Uuid;

use crate::database::{parse_timestamp, Database};
use crate::error::{conversion_error, not_found, Result};
use crate::models::FileStoreElement;

const FILE_COLUMNS: &str = "id, owner_key_id, uuid, path, content_hash, size_bytes, modify_time, \
     is_deleted, is_downloading, external_http_path, created_at";

impl Database {
    /// Insert a new file element and return its row id.
    pub fn insert_file_element(&self, element: &FileStoreElement) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO file_store (owner_key_id, uuid, path, content_hash, size_bytes,
                modify_time, is_deleted, is_downloading, external_http_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                element.owner_key_id.as_str(),
                element.uuid.to_string(),
                element.path,
                element.content_hash,
                element.size_bytes as i64,
                element.modify_time.to_rfc3339(),
                element.is_deleted as i32,
                element.is_downloading as i32,
                element.external_http_path,
                element.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Overwrite every mutable column of an existing element.
    pub fn save_file_element(&self, element: &FileStoreElement) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE file_store SET
                path = ?1, content_hash = ?2, size_bytes = ?3, modify_time = ?4,
                is_deleted = ?5, is_downloading = ?6, external_http_path = ?7
             WHERE id = ?8",
            params![
                element.path,
                element.content_hash,
                element.size_bytes as i64,
                element.modify_time.to_rfc3339(),
                element.is_deleted as i32,
                element.is_downloading as i32,
                element.external_http_path,
                element.id,
            ],
        )?;
        if affected == 0 {
            return Err(crate::StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_file_element(&self, owner: &KeyId, uuid: Uuid) -> Result<FileStoreElement> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM file_store WHERE owner_key_id = ?1 AND uuid = ?2"),
                params![owner.as_str(), uuid.to_string()],
                row_to_file_element,
            )
            .map_err(not_found)
    }

    pub fn get_file_element_by_id(&self, id: i64) -> Result<FileStoreElement> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM file_store WHERE id = ?1"),
                params![id],
                row_to_file_element,
            )
            .map_err(not_found)
    }

    /// Elements shared with `owner`, optionally including tombstones.
    pub fn list_file_elements(
        &self,
        owner: &KeyId,
        include_deleted: bool,
    ) -> Result<Vec<FileStoreElement>> {
        self.query_file_elements(
            &format!(
                "SELECT {FILE_COLUMNS} FROM file_store
                 WHERE owner_key_id = ?1 AND (?2 OR is_deleted = 0)
                 ORDER BY path"
            ),
            params![owner.as_str(), include_deleted],
        )
    }

    /// Live local elements eligible for change detection.
    pub fn list_scan_candidates(&self) -> Result<Vec<FileStoreElement>> {
        self.query_file_elements(
            &format!(
                "SELECT {FILE_COLUMNS} FROM file_store
                 WHERE is_deleted = 0 AND is_downloading = 0 AND external_http_path IS NULL"
            ),
            [],
        )
    }

    /// Elements with a pending remote locator.
    pub fn list_pending_downloads(&self) -> Result<Vec<FileStoreElement>> {
        self.query_file_elements(
            &format!(
                "SELECT {FILE_COLUMNS} FROM file_store
                 WHERE is_deleted = 0 AND external_http_path IS NOT NULL"
            ),
            [],
        )
    }

    /// Physically remove an element row.
    pub fn delete_file_element(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM file_store WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn query_file_elements<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<FileStoreElement>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_file_element)?;

        let mut elements = Vec::new();
        for row in rows {
            elements.push(row?);
        }
        Ok(elements)
    }
}

fn row_to_file_element(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileStoreElement> {
    let owner: String = row.get(1)?;
    let uuid: String = row.get(2)?;
    let size_bytes: i64 = row.get(5)?;
    let modify_time: String = row.get(6)?;
    let is_deleted: i32 = row.get(7)?;
    let is_downloading: i32 = row.get(8)?;
    let created_at: String = row.get(10)?;

    Ok(FileStoreElement {
        id: row.get(0)?,
        owner_key_id: KeyId::new(&owner),
        uuid: Uuid::parse_str(&uuid).map_err(|e| conversion_error(2, e))?,
        path: row.get(3)?,
        content_hash: row.get(4)?,
        size_bytes: size_bytes.max(0) as u64,
        modify_time: parse_timestamp(6, &modify_time)?,
        is_deleted: is_deleted != 0,
        is_downloading: is_downloading != 0,
        external_http_path: row.get(9)?,
        created_at: parse_timestamp(10, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn element(owner: &str) -> FileStoreElement {
        FileStoreElement {
            id: 0,
            owner_key_id: KeyId::new(owner),
            uuid: Uuid::new_v4(),
            path: "/Unsort/a.txt".to_string(),
            content_hash: "00".to_string(),
            size_bytes: 0,
            modify_time: Utc::now(),
            is_deleted: false,
            is_downloading: false,
            external_http_path: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_get_save() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let mut el = element("0123456789abcdef");
        el.id = db.insert_file_element(&el).unwrap();

        el.size_bytes = 42;
        el.external_http_path = Some("i2p://x.b32.i2p/a/files/k/u/h".to_string());
        db.save_file_element(&el).unwrap();

        let stored = db.get_file_element(&el.owner_key_id, el.uuid).unwrap();
        assert_eq!(stored.size_bytes, 42);
        assert_eq!(stored, db.get_file_element_by_id(el.id).unwrap());
    }

    #[test]
    fn test_duplicate_owner_uuid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();
        let el = element("0123456789abcdef");
        db.insert_file_element(&el).unwrap();
        assert!(db.insert_file_element(&el).is_err());
    }

    #[test]
    fn test_candidate_queries() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let local = element("0123456789abcdef");
        db.insert_file_element(&local).unwrap();

        let mut remote = element("0123456789abcdef");
        remote.external_http_path = Some("tor://y.onion/b/files/k/u/h".to_string());
        db.insert_file_element(&remote).unwrap();

        let mut gone = element("0123456789abcdef");
        gone.is_deleted = true;
        db.insert_file_element(&gone).unwrap();

        assert_eq!(db.list_scan_candidates().unwrap().len(), 1);
        assert_eq!(db.list_pending_downloads().unwrap().len(), 1);
        let owner = KeyId::new("0123456789abcdef");
        assert_eq!(db.list_file_elements(&owner, false).unwrap().len(), 2);
        assert_eq!(db.list_file_elements(&owner, true).unwrap().len(), 3);
    }
}
