use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{dedupe_by_fingerprint, CatalogSource, ObservationStore, StoreError, UploadLedger};
use crate::ledger::{NewUpload, UploadRecord, UploadUpdate};
use crate::model::{Block, Farm, Observation};

/// Catalog, observations and upload ledger over the hosted Postgres schema
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogSource for PgStore {
    async fn fetch_farms(&self) -> Result<Vec<Farm>, StoreError> {
        let farms = sqlx::query_as::<_, Farm>(
            "SELECT id, nombre AS name, geojson AS boundary FROM fincas ORDER BY nombre",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(farms)
    }

    async fn fetch_blocks_by_farm(&self, farm_id: Uuid) -> Result<Vec<Block>, StoreError> {
        let blocks = sqlx::query_as::<_, Block>(
            r#"
            SELECT id,
                   finca_id AS farm_id,
                   nombre AS name,
                   plantas_total::int4 AS plant_count,
                   porcentaje::float8 AS sample_pct,
                   plantas_muestreo::int4 AS sample_count
            FROM bloques
            WHERE finca_id = $1
            ORDER BY nombre
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(blocks)
    }
}

#[async_trait]
impl ObservationStore for PgStore {
    async fn upsert_observations(&self, rows: &[Observation]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        // ON CONFLICT cannot touch the same key twice in one statement
        let rows = dedupe_by_fingerprint(rows);

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO monitoreos (fecha, finca_id, bloque_id, lat, lon, tecnico, \
             brotes_pos, hojas_adultas_pos, limones_pos, botones_pos, yemas_pos, fingerprint) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.date)
                .push_bind(row.farm_id)
                .push_bind(row.block_id)
                .push_bind(row.lat)
                .push_bind(row.lon)
                .push_bind(row.technician.clone())
                .push_bind(row.shoots)
                .push_bind(row.mature_leaves)
                .push_bind(row.fruits)
                .push_bind(row.flower_buds)
                .push_bind(row.buds)
                .push_bind(row.fingerprint.clone());
        });
        qb.push(
            r#"
            ON CONFLICT (fingerprint) DO UPDATE SET
                fecha = EXCLUDED.fecha,
                finca_id = EXCLUDED.finca_id,
                bloque_id = EXCLUDED.bloque_id,
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon,
                tecnico = EXCLUDED.tecnico,
                brotes_pos = EXCLUDED.brotes_pos,
                hojas_adultas_pos = EXCLUDED.hojas_adultas_pos,
                limones_pos = EXCLUDED.limones_pos,
                botones_pos = EXCLUDED.botones_pos,
                yemas_pos = EXCLUDED.yemas_pos
            "#,
        );

        qb.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadLedger for PgStore {
    async fn create_upload_record(&self, new: &NewUpload) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO uploads (id, user_id, filename, status, total_rows, valid_rows, invalid_rows)
            VALUES ($1, $2, $3, 'processing', 0, 0, 0)
            "#,
        )
        .bind(id)
        .bind(&new.user_id)
        .bind(&new.filename)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_upload_record(
        &self,
        id: Uuid,
        update: &UploadUpdate,
    ) -> Result<(), StoreError> {
        let terminal = update.status.map(|s| s.is_terminal()).unwrap_or(false);
        let result = sqlx::query(
            r#"
            UPDATE uploads
            SET status = COALESCE($2, status),
                total_rows = COALESCE($3, total_rows),
                valid_rows = COALESCE($4, valid_rows),
                invalid_rows = COALESCE($5, invalid_rows),
                error = COALESCE($6, error),
                finished_at = CASE WHEN $7 THEN now() ELSE finished_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.total_rows)
        .bind(update.valid_rows)
        .bind(update.invalid_rows)
        .bind(update.error.as_deref())
        .bind(terminal)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UploadNotFound(id));
        }
        Ok(())
    }

    async fn get_upload_record(&self, id: Uuid) -> Result<Option<UploadRecord>, StoreError> {
        let record = sqlx::query_as::<_, UploadRecord>(
            r#"
            SELECT id, user_id, filename, status, total_rows, valid_rows, invalid_rows,
                   error, created_at, finished_at
            FROM uploads
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_upload_records(&self, limit: i64) -> Result<Vec<UploadRecord>, StoreError> {
        let records = sqlx::query_as::<_, UploadRecord>(
            r#"
            SELECT id, user_id, filename, status, total_rows, valid_rows, invalid_rows,
                   error, created_at, finished_at
            FROM uploads
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
