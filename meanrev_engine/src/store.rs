/// store.rs — Postgres persistence for the paper account
///
/// Tables (created by `migrate`):
///   paper_accounts         one row per account name (upserted)
///   paper_positions        open positions, replaced on every flush
///   paper_orders           upserted by order id (status can change)
///   paper_trades           append-only, idempotent by trade id
///   performance_snapshots  one row per periodic snapshot
use chrono::{DateTime, TimeZone, Utc};
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::account::{AccountSummary, OrderType, PaperAccount};
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS paper_accounts (
    name             TEXT PRIMARY KEY,
    initial_balance  DOUBLE PRECISION NOT NULL,
    balance          DOUBLE PRECISION NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS paper_positions (
    account      TEXT NOT NULL REFERENCES paper_accounts(name),
    symbol       TEXT NOT NULL,
    side         TEXT NOT NULL,
    size         DOUBLE PRECISION NOT NULL,
    entry_price  DOUBLE PRECISION NOT NULL,
    realized_pnl DOUBLE PRECISION NOT NULL,
    opened_ms    BIGINT NOT NULL,
    updated_ms   BIGINT NOT NULL,
    PRIMARY KEY (account, symbol)
);
CREATE TABLE IF NOT EXISTS paper_orders (
    id            UUID PRIMARY KEY,
    account       TEXT NOT NULL REFERENCES paper_accounts(name),
    symbol        TEXT NOT NULL,
    side          TEXT NOT NULL,
    order_type    TEXT NOT NULL,
    limit_price   DOUBLE PRECISION,
    size          DOUBLE PRECISION NOT NULL,
    status        TEXT NOT NULL,
    trigger_name  TEXT,
    confidence    DOUBLE PRECISION,
    fill_price    DOUBLE PRECISION,
    created_ms    BIGINT NOT NULL,
    filled_ms     BIGINT,
    exchange_oid  BIGINT
);
ALTER TABLE paper_orders ADD COLUMN IF NOT EXISTS exchange_oid BIGINT;
CREATE TABLE IF NOT EXISTS paper_trades (
    id            UUID PRIMARY KEY,
    account       TEXT NOT NULL REFERENCES paper_accounts(name),
    order_id      UUID NOT NULL,
    symbol        TEXT NOT NULL,
    side          TEXT NOT NULL,
    size          DOUBLE PRECISION NOT NULL,
    price         DOUBLE PRECISION NOT NULL,
    fee           DOUBLE PRECISION NOT NULL,
    realized_pnl  DOUBLE PRECISION,
    ts_ms         BIGINT NOT NULL,
    trigger_name  TEXT
);
CREATE TABLE IF NOT EXISTS performance_snapshots (
    id              BIGSERIAL PRIMARY KEY,
    account         TEXT NOT NULL REFERENCES paper_accounts(name),
    taken_at        TIMESTAMPTZ NOT NULL,
    balance         DOUBLE PRECISION NOT NULL,
    equity          DOUBLE PRECISION NOT NULL,
    realized_pnl    DOUBLE PRECISION NOT NULL,
    unrealized_pnl  DOUBLE PRECISION NOT NULL,
    trade_count     BIGINT NOT NULL,
    win_rate        DOUBLE PRECISION NOT NULL,
    max_drawdown    DOUBLE PRECISION NOT NULL,
    open_positions  BIGINT NOT NULL
);
";

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(db_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("postgres connection error: {err}");
            }
        });
        info!("Connected to postgres");
        Ok(Self { client })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    pub async fn upsert_account(&self, account: &PaperAccount) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO paper_accounts (name, initial_balance, balance)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (name) DO UPDATE SET
                     balance = EXCLUDED.balance,
                     updated_at = NOW()",
                &[&account.name, &account.initial_balance, &account.balance()],
            )
            .await?;
        Ok(())
    }

    /// Write balance, positions, orders and trades in one transaction.
    pub async fn flush(&mut self, account: &PaperAccount) -> Result<(), StoreError> {
        let tx = self.client.transaction().await?;
        let name = account.name.as_str();

        tx.execute(
            "INSERT INTO paper_accounts (name, initial_balance, balance)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET
                 balance = EXCLUDED.balance,
                 updated_at = NOW()",
            &[&name, &account.initial_balance, &account.balance()],
        )
        .await?;

        tx.execute("DELETE FROM paper_positions WHERE account = $1", &[&name]).await?;
        let insert_position = tx
            .prepare(
                "INSERT INTO paper_positions
                     (account, symbol, side, size, entry_price, realized_pnl, opened_ms, updated_ms)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .await?;
        for p in account.positions() {
            tx.execute(
                &insert_position,
                &[
                    &name,
                    &p.symbol,
                    &p.side.as_str(),
                    &p.size,
                    &p.entry_price,
                    &p.realized_pnl,
                    &p.opened_ms,
                    &p.updated_ms,
                ],
            )
            .await?;
        }

        let upsert_order = tx
            .prepare(
                "INSERT INTO paper_orders
                     (id, account, symbol, side, order_type, limit_price, size, status,
                      trigger_name, confidence, fill_price, created_ms, filled_ms, exchange_oid)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                 ON CONFLICT (id) DO UPDATE SET
                     status = EXCLUDED.status,
                     fill_price = EXCLUDED.fill_price,
                     filled_ms = EXCLUDED.filled_ms",
            )
            .await?;
        for o in account.orders() {
            let (kind, limit_price) = match o.order_type {
                OrderType::Market => ("market", None),
                OrderType::Limit { price } => ("limit", Some(price)),
            };
            let trigger_name = o.trigger.as_ref().map(|t| t.name.as_str());
            let confidence = o.trigger.as_ref().map(|t| t.confidence);
            let exchange_oid = o.exchange_oid.map(|oid| oid as i64);
            tx.execute(
                &upsert_order,
                &[
                    &o.id,
                    &name,
                    &o.symbol,
                    &o.side.as_str(),
                    &kind,
                    &limit_price,
                    &o.size,
                    &o.status.as_str(),
                    &trigger_name,
                    &confidence,
                    &o.fill_price,
                    &o.created_ms,
                    &o.filled_ms,
                    &exchange_oid,
                ],
            )
            .await?;
        }

        let insert_trade = tx
            .prepare(
                "INSERT INTO paper_trades
                     (id, account, order_id, symbol, side, size, price, fee, realized_pnl, ts_ms, trigger_name)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (id) DO NOTHING",
            )
            .await?;
        for t in account.trades() {
            tx.execute(
                &insert_trade,
                &[
                    &t.id,
                    &name,
                    &t.order_id,
                    &t.symbol,
                    &t.side.as_str(),
                    &t.size,
                    &t.price,
                    &t.fee,
                    &t.realized_pnl,
                    &t.ts_ms,
                    &t.trigger,
                ],
            )
            .await?;
        }

        tx.commit().await?;
        info!(
            "Flushed account {} ({} positions, {} orders, {} trades)",
            name,
            account.positions().count(),
            account.orders().len(),
            account.trades().len()
        );
        Ok(())
    }

    pub async fn insert_snapshot(&self, summary: &AccountSummary, ts_ms: i64) -> Result<(), StoreError> {
        let taken_at = snapshot_time(ts_ms);
        self.client
            .execute(
                "INSERT INTO performance_snapshots
                     (account, taken_at, balance, equity, realized_pnl, unrealized_pnl,
                      trade_count, win_rate, max_drawdown, open_positions)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &summary.name,
                    &taken_at,
                    &summary.balance,
                    &summary.equity,
                    &summary.realized_pnl,
                    &summary.unrealized_pnl,
                    &(summary.trade_count as i64),
                    &summary.win_rate,
                    &summary.max_drawdown,
                    &(summary.open_positions as i64),
                ],
            )
            .await?;
        Ok(())
    }
}

fn snapshot_time(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now)
}
