use rusqlite::{params, OptionalExtension};

use crate::database::{parse_optional_timestamp, Database};
use crate::error::Result;
use crate::models::EndpointStats;

impl Database {
    pub fn get_endpoint_stats(&self, endpoint: &str) -> Result<Option<EndpointStats>> {
        let stats = self
            .conn()
            .query_row(
                "SELECT endpoint, fail_streak, current_delay, delay_elapsed, last_contact_out
                 FROM endpoint_stats WHERE endpoint = ?1",
                params![endpoint],
                row_to_stats,
            )
            .optional()?;
        Ok(stats)
    }

    /// Stored stats for `endpoint`, or a fresh zeroed record (not persisted).
    pub fn endpoint_stats_or_default(&self, endpoint: &str) -> Result<EndpointStats> {
        Ok(self
            .get_endpoint_stats(endpoint)?
            .unwrap_or_else(|| EndpointStats::new(endpoint)))
    }

    pub fn save_endpoint_stats(&self, stats: &EndpointStats) -> Result<()> {
        self.conn().execute(
            "INSERT INTO endpoint_stats
                (endpoint, fail_streak, current_delay, delay_elapsed, last_contact_out)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(endpoint) DO UPDATE SET
                fail_streak      = excluded.fail_streak,
                current_delay    = excluded.current_delay,
                delay_elapsed    = excluded.delay_elapsed,
                last_contact_out = excluded.last_contact_out",
            params![
                stats.endpoint,
                stats.fail_streak,
                stats.current_delay,
                stats.delay_elapsed,
                stats.last_contact_out.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

fn row_to_stats(row: &rusqlite::Row<'_>) -> rusqlite::Result<EndpointStats> {
    let last_contact_out: Option<String> = row.get(4)?;
    Ok(EndpointStats {
        endpoint: row.get(0)?,
        fail_streak: row.get(1)?,
        current_delay: row.get(2)?,
        delay_elapsed: row.get(3)?,
        last_contact_out: parse_optional_timestamp(4, last_contact_out)?,
    })
}
