use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{parse_datetime, parse_verdict, parse_verdict_source, to_i64, to_u64},
        models::{InspectionRecord, InspectionStats, NewInspection},
    },
    traits::InspectionStore,
};

fn row_to_inspection(row: &Row) -> Result<InspectionRecord> {
    let status: String = row.get("status")?;
    let verdict_source: String = row.get("verdict_source")?;
    let recorded_at: String = row.get("recorded_at")?;

    Ok(InspectionRecord {
        id: row.get("id")?,
        serial_no: row.get("serial_no")?,
        status: parse_verdict(&status)?,
        meter_id: row.get("meter_id")?,
        client: row.get("client")?,
        verdict_source: parse_verdict_source(&verdict_source)?,
        recorded_at: parse_datetime(&recorded_at, "recorded_at")?,
    })
}

impl Database {
    /// Returns `false` when a record with the same id already exists.
    pub async fn insert_inspection(&self, record: &NewInspection) -> Result<bool> {
        let record = record.clone();
        self.execute(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT INTO inspections (id, serial_no, status, meter_id, client, verdict_source, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        record.id,
                        record.serial_no,
                        record.status.as_str(),
                        record.meter_id,
                        record.client,
                        record.verdict_source.as_str(),
                        Utc::now().to_rfc3339(),
                    ],
                )
                .with_context(|| "failed to insert inspection")?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn get_inspection(&self, inspection_id: &str) -> Result<Option<InspectionRecord>> {
        let inspection_id = inspection_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, serial_no, status, meter_id, client, verdict_source, recorded_at
                 FROM inspections
                 WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![inspection_id])?;
            let record = match rows.next()? {
                Some(row) => Some(row_to_inspection(row)?),
                None => None,
            };
            Ok(record)
        })
        .await
    }

    /// Most recent first.
    pub async fn list_inspections(&self, limit: usize) -> Result<Vec<InspectionRecord>> {
        let limit = to_i64(limit, "limit")?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, serial_no, status, meter_id, client, verdict_source, recorded_at
                 FROM inspections
                 ORDER BY recorded_at DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt.query(params![limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_inspection(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn get_inspection_stats(&self, now: DateTime<Utc>) -> Result<InspectionStats> {
        let today = now.date_naive().format("%Y-%m-%d").to_string();
        self.execute(move |conn| {
            let stats = conn.query_row(
                "SELECT
                     COUNT(*),
                     COALESCE(SUM(CASE WHEN status = 'pass' THEN 1 ELSE 0 END), 0),
                     COALESCE(SUM(CASE WHEN status = 'fail' THEN 1 ELSE 0 END), 0),
                     COALESCE(SUM(CASE WHEN substr(recorded_at, 1, 10) = ?1 THEN 1 ELSE 0 END), 0),
                     COALESCE(SUM(CASE WHEN substr(recorded_at, 1, 10) = ?1 AND status = 'pass' THEN 1 ELSE 0 END), 0),
                     COALESCE(SUM(CASE WHEN substr(recorded_at, 1, 10) = ?1 AND status = 'fail' THEN 1 ELSE 0 END), 0)
                 FROM inspections",
                params![today],
                |row| {
                    Ok([
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ])
                },
            )?;

            Ok(InspectionStats {
                total: to_u64(stats[0], "total")?,
                correct: to_u64(stats[1], "correct")?,
                incorrect: to_u64(stats[2], "incorrect")?,
                today_total: to_u64(stats[3], "today_total")?,
                today_correct: to_u64(stats[4], "today_correct")?,
                today_incorrect: to_u64(stats[5], "today_incorrect")?,
            })
        })
        .await
    }
}

#[async_trait]
impl InspectionStore for Database {
    async fn save_inspection(&self, record: &NewInspection) -> Result<()> {
        if self.insert_inspection(record).await? {
            info!(
                "Recorded inspection {} ({} {} for meter {})",
                record.id, record.serial_no, record.status, record.meter_id
            );
        } else {
            match self.get_inspection(&record.id).await? {
                Some(stored) if stored.status != record.status => warn!(
                    "Inspection {} was already recorded as {}; ignoring {}",
                    record.id, stored.status, record.status
                ),
                _ => warn!("Inspection {} was already recorded; keeping the stored copy", record.id),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Verdict, VerdictSource};

    fn record(id: &str, serial: &str, status: Verdict) -> NewInspection {
        NewInspection {
            id: id.into(),
            serial_no: serial.into(),
            status,
            meter_id: "M1".into(),
            client: "Acme".into(),
            verdict_source: VerdictSource::Automatic,
        }
    }

    #[tokio::test]
    async fn saving_the_same_capture_twice_keeps_one_row() {
        let db = Database::in_memory().unwrap();
        db.save_inspection(&record("cap-1", "S100", Verdict::Fail)).await.unwrap();

        let mut again = record("cap-1", "S100", Verdict::Pass);
        again.verdict_source = VerdictSource::Operator;
        db.save_inspection(&again).await.unwrap();

        let stored = db.list_inspections(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, Verdict::Fail);
        assert_eq!(stored[0].verdict_source, VerdictSource::Automatic);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let db = Database::in_memory().unwrap();
        for (i, serial) in ["S1", "S2", "S3"].iter().enumerate() {
            db.insert_inspection(&record(&format!("cap-{i}"), serial, Verdict::Pass))
                .await
                .unwrap();
        }

        let serials: Vec<String> = db
            .list_inspections(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.serial_no)
            .collect();
        assert_eq!(serials, vec!["S3", "S2"]);
        assert_eq!(
            db.get_inspection("cap-0").await.unwrap().map(|r| r.serial_no),
            Some("S1".to_string())
        );
    }

    #[tokio::test]
    async fn stats_split_totals_and_today() {
        let db = Database::in_memory().unwrap();
        db.insert_inspection(&record("a", "S1", Verdict::Pass)).await.unwrap();
        db.insert_inspection(&record("b", "S2", Verdict::Pass)).await.unwrap();
        db.insert_inspection(&record("c", "S3", Verdict::Fail)).await.unwrap();

        // An older row written straight to the table.
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO inspections (id, serial_no, status, meter_id, client, verdict_source, recorded_at)
                 VALUES ('old', 'S0', 'fail', 'M1', 'Acme', 'operator', '2020-01-01T08:00:00+00:00')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let stats = db.get_inspection_stats(Utc::now()).await.unwrap();
        assert_eq!(
            stats,
            InspectionStats {
                total: 4,
                correct: 2,
                incorrect: 2,
                today_total: 3,
                today_correct: 2,
                today_incorrect: 1,
            }
        );
    }

    #[tokio::test]
    async fn empty_store_has_zero_stats() {
        let db = Database::in_memory().unwrap();
        assert_eq!(
            db.get_inspection_stats(Utc::now()).await.unwrap(),
            InspectionStats::default()
        );
    }
}
