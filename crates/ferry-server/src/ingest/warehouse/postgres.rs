//! Postgres warehouse
//!
//! Staged objects are read back from staging, decompressed, parsed as
//! delimited text and inserted into `<dataset>.<table>` inside one
//! transaction. Every job is tracked in `warehouse_load_jobs`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ferry_common::compression::gunzip;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::schema::{self, ColumnType};
use super::{Compression, LoadFailure, LoadFormat, LoadJob, LoadRequest, Warehouse, WriteMode};
use crate::ingest::staging::StagingStore;

/// Postgres caps bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Parsed delimited payload
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub columns: Vec<String>,
    pub types: Vec<ColumnType>,
    pub rows: Vec<Vec<String>>,
}

/// Parse a delimited payload according to `format`
pub fn parse_delimited(data: &[u8], format: &LoadFormat) -> Result<ParsedTable> {
    let data = match format.compression {
        Compression::Gzip => gunzip(data).context("Failed to decompress staged object")?,
        Compression::None => data.to_vec(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(format.delimiter)
        .quote(format.quote)
        .flexible(true)
        .from_reader(data.as_slice());

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed record at row {}", index + 1))?;
        let fields: Vec<String> = record.iter().map(str::to_string).collect();

        if index < format.skip_leading_rows {
            if index == 0 {
                header = Some(fields);
            }
            continue;
        }

        if !format.allow_quoted_newlines && fields.iter().any(|f| f.contains('\n')) {
            anyhow::bail!("Quoted newline at row {} is not allowed", index + 1);
        }
        rows.push(fields);
    }

    let width = rows
        .iter()
        .map(Vec::len)
        .chain(header.iter().map(Vec::len))
        .max()
        .unwrap_or(0);
    if width == 0 {
        anyhow::bail!("Staged object has no columns");
    }

    let mut headers = header.unwrap_or_default();
    headers.resize(width, String::new());
    let columns = schema::column_names(&headers);

    let types = if format.autodetect {
        schema::infer_columns(&rows, width)
    } else {
        vec![ColumnType::Text; width]
    };

    Ok(ParsedTable {
        columns,
        types,
        rows,
    })
}

/// Warehouse backed by a Postgres analytical database
#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
    staging: Arc<dyn StagingStore>,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, staging: Arc<dyn StagingStore>) -> Self {
        Self { pool, staging }
    }

    async fn start_job(&self, job_id: Uuid, request: &LoadRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO warehouse_load_jobs (id, source_uri, target_schema, target_table, write_mode, status)
            VALUES ($1, $2, $3, $4, $5, 'RUNNING')
            "#,
        )
        .bind(job_id)
        .bind(&request.source_uri)
        .bind(&request.destination.dataset)
        .bind(&request.destination.table)
        .bind(request.write_mode.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to register load job")?;
        Ok(())
    }

    async fn finish_job(&self, job_id: Uuid, outcome: &Result<u64>) -> Result<()> {
        let (status, rows, error) = match outcome {
            Ok(rows) => ("DONE", Some(*rows as i64), None),
            Err(e) => ("FAILED", None, Some(format!("{:#}", e))),
        };

        sqlx::query(
            r#"
            UPDATE warehouse_load_jobs
            SET status = $2, rows_loaded = $3, error_message = $4, finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(rows)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to finish load job")?;
        Ok(())
    }

    async fn run_job(&self, request: &LoadRequest) -> Result<u64> {
        let dataset = &request.destination.dataset;
        let table = &request.destination.table;
        if !schema::is_valid_identifier(dataset) || !schema::is_valid_identifier(table) {
            anyhow::bail!("Invalid destination identifier: {}", request.destination);
        }

        let data = self.staging.get(&request.object_key).await?;
        let parsed = parse_delimited(&data, &request.format)?;
        let qualified = format!(
            "{}.{}",
            schema::quote_ident(dataset),
            schema::quote_ident(table)
        );

        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        sqlx::query(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            schema::quote_ident(dataset)
        ))
        .execute(&mut *tx)
        .await
        .context("Failed to create schema")?;

        let column_defs = |types: &[ColumnType]| -> Vec<String> {
            parsed
                .columns
                .iter()
                .zip(types)
                .map(|(name, ty)| format!("{} {}", schema::quote_ident(name), ty.sql_name()))
                .collect()
        };

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            qualified,
            column_defs(&parsed.types).join(", ")
        ))
        .execute(&mut *tx)
        .await
        .context("Failed to create destination table")?;

        let existing: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            "#,
        )
        .bind(dataset)
        .bind(table)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to read destination columns")?
        .into_iter()
        .collect();

        let types = schema::reconcile_types(&parsed.columns, &parsed.types, &existing, &parsed.rows)?;

        for def in column_defs(&types) {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                qualified, def
            ))
            .execute(&mut *tx)
            .await
            .context("Failed to extend destination table")?;
        }

        if request.write_mode == WriteMode::Truncate {
            sqlx::query(&format!("TRUNCATE TABLE {}", qualified))
                .execute(&mut *tx)
                .await
                .context("Failed to truncate destination table")?;
        }

        let column_list = parsed
            .columns
            .iter()
            .map(|c| schema::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let width = parsed.columns.len();
        let chunk_rows = (MAX_BIND_PARAMS / width).max(1);

        for chunk in parsed.rows.chunks(chunk_rows) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", qualified, column_list));

            builder.push_values(chunk, |mut b, row| {
                for (i, ty) in types.iter().enumerate() {
                    let value = row
                        .get(i)
                        .map(|v| v.trim())
                        .filter(|v| !v.is_empty())
                        .map(str::to_string);
                    b.push_bind(value).push_unseparated(format!("::{}", ty.sql_name()));
                }
            });

            builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert rows")?;
        }

        tx.commit().await.context("Failed to commit load")?;

        Ok(parsed.rows.len() as u64)
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    #[instrument(skip(self, request), fields(uri = %request.source_uri, destination = %request.destination))]
    async fn load(&self, request: &LoadRequest) -> Result<LoadJob, LoadFailure> {
        let job_id = Uuid::new_v4();
        self.start_job(job_id, request)
            .await
            .map_err(|e| LoadFailure::new(None, format!("{:#}", e)))?;

        let outcome = self.run_job(request).await;

        if let Err(e) = self.finish_job(job_id, &outcome).await {
            warn!(job_id = %job_id, error = %e, "Failed to record load job state");
        }

        match outcome {
            Ok(rows_loaded) => {
                info!(job_id = %job_id, rows_loaded, "Load job completed");
                Ok(LoadJob {
                    job_id: job_id.to_string(),
                    rows_loaded,
                })
            },
            Err(e) => Err(LoadFailure::new(Some(job_id.to_string()), format!("{:#}", e))),
        }
    }
}
