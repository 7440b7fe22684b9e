use async_trait::async_trait;
use diesel::{
    connection::SimpleConnection,
    prelude::*,
    r2d2::{ConnectionManager, Pool},
};

use solroute_core::error::{RouterError, RouterResult};
use solroute_core::model::{QuoteRecord, SwapStatus, SwapTransactionRecord};
use solroute_core::store::{QuoteStore, SwapStore};

mod models;
mod schema;

use self::models::{QuoteRecordRow, SwapTransactionRow};
use self::schema::quote_records as quotes_tbl;
use self::schema::swap_transactions as swaps_tbl;

fn persistence_error(context: impl Into<String>, err: impl std::fmt::Display) -> RouterError {
    RouterError::database(context.into()).with_context(err.to_string())
}

fn status_to_i32(status: SwapStatus) -> i32 {
    status as i32
}

fn status_from_i32(raw: i32) -> SwapStatus {
    match raw {
        0 => SwapStatus::Pending,
        1 => SwapStatus::Completed,
        2 => SwapStatus::Failed,
        _ => SwapStatus::Expired,
    }
}

/// Sqlite-backed store for quote and swap-transaction records.
pub struct SqliteStore {
    pool: Pool<ConnectionManager<SqliteConnection>>,
    busy_timeout_ms: i64,
}

impl SqliteStore {
    pub fn new(path: &str) -> RouterResult<Self> {
        Self::new_with_busy_timeout(path, 5_000)
    }

    pub fn new_with_busy_timeout(path: &str, busy_timeout_ms: i64) -> RouterResult<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| persistence_error(format!("open sqlite pool (path={path})"), e))?;
        let mut conn = pool
            .get()
            .map_err(|e| persistence_error(format!("open sqlite connection (path={path})"), e))?;
        initialize_schema(&mut conn)?;
        apply_pragmas(&mut conn, busy_timeout_ms)?;
        Ok(Self { pool, busy_timeout_ms })
    }

    fn get_conn(&self) -> RouterResult<r2d2::PooledConnection<ConnectionManager<SqliteConnection>>> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| persistence_error("open sqlite connection", e))?;
        apply_pragmas(&mut conn, self.busy_timeout_ms)?;
        Ok(conn)
    }

    fn quote_to_row(record: &QuoteRecord) -> QuoteRecordRow {
        QuoteRecordRow {
            quote_id: record.id.clone(),
            provider: record.provider.clone(),
            input_mint: record.input_mint.clone(),
            output_mint: record.output_mint.clone(),
            in_amount: record.in_amount.clone(),
            out_amount: record.out_amount.clone(),
            price_impact_pct: record.price_impact_pct.clone(),
            route_data: record.route_data.clone(),
            fee_amount: record.fee_amount.clone(),
            gas_estimate: record.gas_estimate.map(|g| g as i64),
            response_time_ms: record.response_time_ms as i64,
            is_cached: record.is_cached as i32,
            created_at: record.created_at,
            expires_at: record.expires_at,
            efficiency_score: record.efficiency_score,
            reliability_score: record.reliability_score,
            slippage_bps: record.slippage_bps as i32,
        }
    }

    fn quote_from_row(row: QuoteRecordRow) -> QuoteRecord {
        QuoteRecord {
            id: row.quote_id,
            provider: row.provider,
            input_mint: row.input_mint,
            output_mint: row.output_mint,
            in_amount: row.in_amount,
            out_amount: row.out_amount,
            price_impact_pct: row.price_impact_pct,
            route_data: row.route_data,
            fee_amount: row.fee_amount,
            gas_estimate: row.gas_estimate.map(|g| g as u64),
            response_time_ms: row.response_time_ms as u64,
            is_cached: row.is_cached != 0,
            created_at: row.created_at,
            expires_at: row.expires_at,
            efficiency_score: row.efficiency_score,
            reliability_score: row.reliability_score,
            slippage_bps: row.slippage_bps as u32,
        }
    }

    fn swap_to_row(record: &SwapTransactionRecord) -> SwapTransactionRow {
        SwapTransactionRow {
            tx_id: record.id.clone(),
            user_public_key: record.user_public_key.clone(),
            input_mint: record.input_mint.clone(),
            output_mint: record.output_mint.clone(),
            in_amount: record.in_amount.clone(),
            out_amount: record.out_amount.clone(),
            min_out_amount: record.min_out_amount.clone(),
            slippage_bps: record.slippage_bps as i32,
            provider: record.provider.clone(),
            status: status_to_i32(record.status),
            tx_hash: record.tx_hash.clone(),
            route_data: record.route_data.clone(),
            fee_amount: record.fee_amount.clone(),
            gas_estimate: record.gas_estimate.map(|g| g as i64),
            execution_time_ms: record.execution_time_ms,
            error_code: record.error_code.clone(),
            error_message: record.error_message.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
        }
    }

    fn swap_from_row(row: SwapTransactionRow) -> SwapTransactionRecord {
        SwapTransactionRecord {
            id: row.tx_id,
            user_public_key: row.user_public_key,
            input_mint: row.input_mint,
            output_mint: row.output_mint,
            in_amount: row.in_amount,
            out_amount: row.out_amount,
            min_out_amount: row.min_out_amount,
            slippage_bps: row.slippage_bps as u32,
            provider: row.provider,
            status: status_from_i32(row.status),
            tx_hash: row.tx_hash,
            route_data: row.route_data,
            fee_amount: row.fee_amount,
            gas_estimate: row.gas_estimate.map(|g| g as u64),
            execution_time_ms: row.execution_time_ms,
            error_code: row.error_code,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait]
impl QuoteStore for SqliteStore {
    async fn insert_quote(&self, record: QuoteRecord) -> RouterResult<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(quotes_tbl::table)
            .values(&Self::quote_to_row(&record))
            .execute(&mut conn)
            .map_err(|e| persistence_error("failed to insert quote record", e))?;
        Ok(())
    }

    async fn get_quote(&self, id: &str) -> RouterResult<Option<QuoteRecord>> {
        let mut conn = self.get_conn()?;
        let row = quotes_tbl::table
            .find(id.to_string())
            .first::<QuoteRecordRow>(&mut conn)
            .optional()
            .map_err(|e| persistence_error("failed to fetch quote record", e))?;
        Ok(row.map(Self::quote_from_row))
    }
}

#[async_trait]
impl SwapStore for SqliteStore {
    async fn insert_swap(&self, record: SwapTransactionRecord) -> RouterResult<()> {
        let mut conn = self.get_conn()?;
        diesel::insert_into(swaps_tbl::table)
            .values(&Self::swap_to_row(&record))
            .execute(&mut conn)
            .map_err(|e| persistence_error("failed to insert swap transaction", e))?;
        Ok(())
    }

    async fn get_swap(&self, id: &str) -> RouterResult<Option<SwapTransactionRecord>> {
        let mut conn = self.get_conn()?;
        let row = swaps_tbl::table
            .find(id.to_string())
            .first::<SwapTransactionRow>(&mut conn)
            .optional()
            .map_err(|e| persistence_error("failed to fetch swap transaction", e))?;
        Ok(row.map(Self::swap_from_row))
    }

    async fn update_swap(&self, record: &SwapTransactionRecord) -> RouterResult<()> {
        let mut conn = self.get_conn()?;
        let updated = diesel::update(swaps_tbl::table.find(record.id.clone()))
            .set(&Self::swap_to_row(record))
            .execute(&mut conn)
            .map_err(|e| persistence_error("failed to update swap transaction", e))?;
        if updated == 0 {
            return Err(RouterError::database(format!(
                "swap transaction {} does not exist",
                record.id
            )));
        }
        Ok(())
    }
}

pub fn initialize_schema(conn: &mut SqliteConnection) -> RouterResult<()> {
    conn.batch_execute(
        r#"
        CREATE TABLE IF NOT EXISTS quote_records (
            quote_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            input_mint TEXT NOT NULL,
            output_mint TEXT NOT NULL,
            in_amount TEXT NOT NULL,
            out_amount TEXT NOT NULL,
            price_impact_pct TEXT NOT NULL,
            route_data TEXT NOT NULL,
            fee_amount TEXT,
            gas_estimate BIGINT,
            response_time_ms BIGINT NOT NULL,
            is_cached INTEGER NOT NULL DEFAULT 0,
            created_at BIGINT NOT NULL,
            expires_at BIGINT NOT NULL,
            efficiency_score DOUBLE,
            reliability_score DOUBLE,
            slippage_bps INTEGER NOT NULL,
            PRIMARY KEY (quote_id)
        );
        CREATE INDEX IF NOT EXISTS idx_quote_pair ON quote_records(input_mint, output_mint);
        CREATE INDEX IF NOT EXISTS idx_quote_expiry ON quote_records(expires_at);

        CREATE TABLE IF NOT EXISTS swap_transactions (
            tx_id TEXT NOT NULL,
            user_public_key TEXT NOT NULL,
            input_mint TEXT NOT NULL,
            output_mint TEXT NOT NULL,
            in_amount TEXT NOT NULL,
            out_amount TEXT NOT NULL,
            min_out_amount TEXT NOT NULL,
            slippage_bps INTEGER NOT NULL,
            provider TEXT NOT NULL,
            status INTEGER NOT NULL,
            tx_hash TEXT,
            route_data TEXT NOT NULL,
            fee_amount TEXT,
            gas_estimate BIGINT,
            execution_time_ms BIGINT,
            error_code TEXT,
            error_message TEXT,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            expires_at BIGINT NOT NULL,
            PRIMARY KEY (tx_id)
        );
        CREATE INDEX IF NOT EXISTS idx_swap_status ON swap_transactions(status);
        CREATE INDEX IF NOT EXISTS idx_swap_user ON swap_transactions(user_public_key);
    "#,
    )
    .map_err(|e| persistence_error("failed to initialize sqlite schema", e))?;
    Ok(())
}

pub fn apply_pragmas(conn: &mut SqliteConnection, busy_timeout_ms: i64) -> RouterResult<()> {
    conn.batch_execute(&format!(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA temp_store=MEMORY;
        PRAGMA cache_size=2000;
        PRAGMA busy_timeout={};
    "#,
        busy_timeout_ms
    ))
    .map_err(|e| persistence_error("failed to apply sqlite pragmas", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solroute_core::store::now_millis;

    fn quote_record(id: &str) -> QuoteRecord {
        let now = now_millis();
        QuoteRecord {
            id: id.to_string(),
            provider: "jupiter".to_string(),
            input_mint: "SOL".to_string(),
            output_mint: "USDC".to_string(),
            in_amount: "1000000000".to_string(),
            out_amount: "145670000".to_string(),
            price_impact_pct: "0.0012".to_string(),
            route_data: "{}".to_string(),
            fee_amount: Some("250000".to_string()),
            gas_estimate: Some(135_000),
            response_time_ms: 250,
            is_cached: false,
            created_at: now,
            expires_at: now + 30_000,
            efficiency_score: Some(0.51),
            reliability_score: Some(0.95),
            slippage_bps: 50,
        }
    }

    fn swap_record(id: &str) -> SwapTransactionRecord {
        let now = now_millis();
        SwapTransactionRecord {
            id: id.to_string(),
            user_public_key: "user-key".to_string(),
            input_mint: "SOL".to_string(),
            output_mint: "USDC".to_string(),
            in_amount: "1000000000".to_string(),
            out_amount: "145670000".to_string(),
            min_out_amount: "144941650".to_string(),
            slippage_bps: 50,
            provider: "jupiter".to_string(),
            status: SwapStatus::Pending,
            tx_hash: None,
            route_data: "{}".to_string(),
            fee_amount: None,
            gas_estimate: None,
            execution_time_ms: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            expires_at: now + 30_000,
        }
    }

    fn open_store() -> (SqliteStore, tempfile::NamedTempFile) {
        let temp = tempfile::NamedTempFile::new().expect("tmp db");
        let path = temp.path().display().to_string();
        (SqliteStore::new(&path).expect("store"), temp)
    }

    #[tokio::test]
    async fn quote_record_round_trips() {
        let (store, _guard) = open_store();
        store.insert_quote(quote_record("q-1")).await.expect("insert");

        let loaded = store.get_quote("q-1").await.expect("get").expect("present");
        assert_eq!(loaded.provider, "jupiter");
        assert_eq!(loaded.out_amount, "145670000");
        assert_eq!(loaded.gas_estimate, Some(135_000));
        assert_eq!(loaded.slippage_bps, 50);
        assert!(!loaded.is_cached);

        assert!(store.get_quote("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn swap_record_round_trips_and_updates() {
        let (store, _guard) = open_store();
        let mut record = swap_record("tx-1");
        store.insert_swap(record.clone()).await.expect("insert");

        record.status = SwapStatus::Completed;
        record.tx_hash = Some("signature".to_string());
        record.execution_time_ms = Some(412);
        store.update_swap(&record).await.expect("update");

        let loaded = store.get_swap("tx-1").await.expect("get").expect("present");
        assert_eq!(loaded.status, SwapStatus::Completed);
        assert_eq!(loaded.tx_hash.as_deref(), Some("signature"));
        assert_eq!(loaded.execution_time_ms, Some(412));
    }

    #[tokio::test]
    async fn updating_a_missing_swap_is_a_database_error() {
        let (store, _guard) = open_store();
        let record = swap_record("tx-ghost");
        let err = store.update_swap(&record).await.expect_err("must fail");
        assert_eq!(err.code(), solroute_commons::error::ErrorCode::DatabaseError);
    }

    #[test]
    fn status_mapping_is_stable() {
        for status in [
            SwapStatus::Pending,
            SwapStatus::Completed,
            SwapStatus::Failed,
            SwapStatus::Expired,
        ] {
            assert_eq!(status_from_i32(status_to_i32(status)), status);
        }
    }
}
