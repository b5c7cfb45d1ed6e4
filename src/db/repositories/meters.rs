use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Row};

use crate::{
    db::{connection::Database, helpers::parse_datetime, models::Meter},
    images::ImageRef,
    traits::MeterCatalog,
};

fn row_to_meter(row: &Row) -> Result<Meter> {
    let image: String = row.get("image")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let id: String = row.get("id")?;

    Ok(Meter {
        image: ImageRef::parse(&image)
            .with_context(|| format!("meter {id} has an unreadable image"))?,
        model: row.get("model")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
        id,
    })
}

impl Database {
    /// Upserts a batch of catalog entries in one transaction.
    pub async fn import_meters(&self, entries: Vec<(String, String, ImageRef)>) -> Result<usize> {
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO meters (id, model, image, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                         model = excluded.model,
                         image = excluded.image,
                         updated_at = excluded.updated_at",
                )?;
                for (id, model, image) in &entries {
                    stmt.execute(params![id, model, image.to_wire(), now])
                        .with_context(|| format!("failed to import meter {id}"))?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
        .await
    }

    pub async fn get_meter(&self, meter_id: &str) -> Result<Option<Meter>> {
        let meter_id = meter_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, model, image, created_at, updated_at FROM meters WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![meter_id])?;
            let meter = match rows.next()? {
                Some(row) => Some(row_to_meter(row)?),
                None => None,
            };
            Ok(meter)
        })
        .await
    }

    pub async fn get_meters(&self) -> Result<Vec<Meter>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, model, image, created_at, updated_at
                 FROM meters
                 ORDER BY model ASC, id ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut meters = Vec::new();
            while let Some(row) = rows.next()? {
                meters.push(row_to_meter(row)?);
            }
            Ok(meters)
        })
        .await
    }
}

#[async_trait]
impl MeterCatalog for Database {
    async fn list_meters(&self) -> Result<Vec<Meter>> {
        self.get_meters().await
    }

    async fn find_meter(&self, meter_id: &str) -> Result<Option<Meter>> {
        self.get_meter(meter_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::tests::sample_png;

    #[tokio::test]
    async fn reimport_replaces_model_and_image() {
        let db = Database::in_memory().unwrap();
        db.import_meters(vec![(
            "M1".into(),
            "EM-100".into(),
            ImageRef::inline(sample_png(2, 2)),
        )])
        .await
        .unwrap();
        let first = db.get_meter("M1").await.unwrap().unwrap();

        db.import_meters(vec![(
            "M1".into(),
            "EM-100b".into(),
            ImageRef::inline(sample_png(5, 4)),
        )])
        .await
        .unwrap();
        let second = db.get_meter("M1").await.unwrap().unwrap();

        assert_eq!(second.model, "EM-100b");
        assert_eq!(second.image.dimensions(), Some((5, 4)));
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(db.get_meters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn import_upserts_every_entry() {
        let db = Database::in_memory().unwrap();
        let imported = db
            .import_meters(vec![
                ("M1".into(), "EM-100".into(), ImageRef::inline(sample_png(2, 2))),
                ("M2".into(), "WM-20".into(), ImageRef::Remote("https://cdn.local/wm.png".into())),
            ])
            .await
            .unwrap();
        assert_eq!(imported, 2);
        assert_eq!(db.get_meters().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn catalog_lookup_resolves_known_ids_only() {
        let db = Database::in_memory().unwrap();
        db.import_meters(vec![
            (
                "M2".into(),
                "WM-20".into(),
                ImageRef::Remote("http://cdn.local/wm20.png".into()),
            ),
            ("M1".into(), "EM-100".into(), ImageRef::inline(sample_png(1, 1))),
        ])
        .await
        .unwrap();

        let catalog: &dyn MeterCatalog = &db;
        let found = catalog.find_meter("M2").await.unwrap().unwrap();
        assert_eq!(found.image, ImageRef::Remote("http://cdn.local/wm20.png".into()));
        assert!(catalog.find_meter("nope").await.unwrap().is_none());

        let models: Vec<String> = catalog
            .list_meters()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.model)
            .collect();
        assert_eq!(models, vec!["EM-100", "WM-20"]);
    }
}
