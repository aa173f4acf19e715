//! # Database Queries
//!
//! This module contains all the SQL for the bank tables.
//! Each function performs a specific database operation.
//!
//! ## Query Organization
//!
//! - `account` queries - `bank_accounts`
//! - `withdrawal` queries - `bank_withdrawals`
//! - `history` queries - `bank_account_history`
//!
//! ## Transactions
//!
//! [`reserve_withdrawal`] and [`transition_withdrawal`] run inside one
//! transaction each and take `FOR UPDATE` on the account row before
//! reading anything they check. Returning early drops the transaction,
//! which rolls it back.
//!
//! [`bank_snapshot`] reads the account, its active withdrawals and its
//! history inside one `REPEATABLE READ` read-only transaction, so all three
//! come from the same committed state.
//!
//! ## Error Handling
//!
//! All queries return `Result<T, DatabaseError>`. Common errors:
//! - `ConnectionError` - Pool could not hand out a connection
//! - `QueryError` - SQL execution failed
//! - `CorruptRow` - A stored value could not be decoded

use deadpool_postgres::{Object, Pool};
use tokio_postgres::{IsolationLevel, Row};
use tracing::{debug, error, info};

use super::models::*;
use super::DatabaseError;
use crate::amount::Amount;
use crate::store::{
    plan_transition, BankSnapshot, ReserveOutcome, ReserveWithdrawal, TransitionOutcome,
};
use crate::utils::normalize_identifier;

const ACCOUNT_COLUMNS: &str =
    "user_id, linked_wallet, bank_cro, dirty_cro, cro_withdrawn_total, last_withdrawal";

const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, address, amount, status, created_at, updated_at, txhash";

/// `$1` = normalized identifier. A wallet match sorts first.
fn resolve_account_sql() -> String {
    format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM bank_accounts
        WHERE lower(linked_wallet) = $1 OR lower(user_id) = $1
        ORDER BY COALESCE(lower(linked_wallet) = $1, FALSE) DESC
        LIMIT 1
        "#
    )
}

/// `$1` = user id, `$2` = normalized address, `$3` = statuses, `$4` = limit.
fn active_withdrawals_sql() -> String {
    format!(
        r#"
        SELECT {WITHDRAWAL_COLUMNS}
        FROM bank_withdrawals
        WHERE (user_id = $1 OR (address = $2 AND $2 <> ''))
          AND status = ANY($3)
        ORDER BY id DESC
        LIMIT $4
        "#
    )
}

const RECENT_HISTORY_SQL: &str = r#"
    SELECT event_type, amount, created_at
    FROM bank_account_history
    WHERE user_id = $1
    ORDER BY id DESC
    LIMIT $2
"#;

fn active_statuses() -> Vec<&'static str> {
    WithdrawalStatus::ACTIVE.iter().map(|s| s.as_str()).collect()
}

// ============================================
// HELPER FUNCTIONS
// ============================================

async fn client(pool: &Pool) -> Result<Object, DatabaseError> {
    pool.get()
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

/// Helper to convert a database row to AccountRecord
fn row_to_account(row: &Row) -> Result<AccountRecord, DatabaseError> {
    Ok(AccountRecord {
        user_id: row.try_get("user_id")?,
        linked_wallet: row.try_get("linked_wallet")?,
        bank_cro: Amount::from_scaled(row.try_get("bank_cro")?),
        dirty_cro: Amount::from_scaled(row.try_get("dirty_cro")?),
        cro_withdrawn_total: Amount::from_scaled(row.try_get("cro_withdrawn_total")?),
        last_withdrawal: row.try_get("last_withdrawal")?,
    })
}

/// Helper to convert a database row to WithdrawalRecord
fn row_to_withdrawal(row: &Row) -> Result<WithdrawalRecord, DatabaseError> {
    let status: String = row.try_get("status")?;
    Ok(WithdrawalRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        address: row.try_get("address")?,
        amount: Amount::from_scaled(row.try_get("amount")?),
        status: status.parse().map_err(DatabaseError::CorruptRow)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        txhash: row.try_get("txhash")?,
    })
}

/// Helper to convert a database row to HistoryEvent
fn row_to_history(row: &Row) -> Result<HistoryEvent, DatabaseError> {
    let event_type: String = row.try_get("event_type")?;
    Ok(HistoryEvent {
        event_type: event_type.parse().map_err(DatabaseError::CorruptRow)?,
        amount: Amount::from_scaled(row.try_get("amount")?),
        created_at: row.try_get("created_at")?,
    })
}

// ============================================
// ACCOUNT QUERIES
// ============================================

/// Resolve an account by linked wallet or user id, case-insensitively.
///
/// A wallet match wins over a user id match.
pub async fn resolve_account(
    pool: &Pool,
    identifier: &str,
) -> Result<Option<AccountRecord>, DatabaseError> {
    let key = normalize_identifier(identifier);
    debug!("Resolving account for: {}", key);

    if key.is_empty() {
        return Ok(None);
    }

    let client = client(pool).await?;
    let row = client.query_opt(&resolve_account_sql(), &[&key]).await?;

    row.as_ref().map(row_to_account).transpose()
}

/// Account, active withdrawals and history from one snapshot.
///
/// History that cannot be read is returned as an error inside the
/// snapshot; the account and its withdrawals are still returned.
pub async fn bank_snapshot(
    pool: &Pool,
    identifier: &str,
    limit: i64,
) -> Result<Option<BankSnapshot>, DatabaseError> {
    let key = normalize_identifier(identifier);
    debug!("Reading bank snapshot for: {}", key);

    if key.is_empty() {
        return Ok(None);
    }

    let mut client = client(pool).await?;
    let tx = client
        .build_transaction()
        .isolation_level(IsolationLevel::RepeatableRead)
        .read_only(true)
        .start()
        .await?;

    let Some(row) = tx.query_opt(&resolve_account_sql(), &[&key]).await? else {
        return Ok(None);
    };
    let account = row_to_account(&row)?;

    let pending = tx
        .query(
            &active_withdrawals_sql(),
            &[&account.user_id, &key, &active_statuses(), &limit],
        )
        .await?
        .iter()
        .map(row_to_withdrawal)
        .collect::<Result<Vec<_>, _>>()?;

    let history = match tx.query(RECENT_HISTORY_SQL, &[&account.user_id, &limit]).await {
        Ok(rows) => rows.iter().map(row_to_history).collect::<Result<Vec<_>, _>>(),
        Err(e) => Err(DatabaseError::from(e)),
    };

    // Read-only; dropping the transaction ends it.
    Ok(Some(BankSnapshot {
        account,
        pending,
        history: history.map_err(Into::into),
    }))
}

/// Create or replace an account record.
pub async fn upsert_account(pool: &Pool, account: &AccountRecord) -> Result<(), DatabaseError> {
    debug!("Upserting account: {}", account.user_id);

    let client = client(pool).await?;
    client
        .execute(
            r#"
            INSERT INTO bank_accounts (
                user_id, linked_wallet, bank_cro, dirty_cro,
                cro_withdrawn_total, last_withdrawal, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                linked_wallet = EXCLUDED.linked_wallet,
                bank_cro = EXCLUDED.bank_cro,
                dirty_cro = EXCLUDED.dirty_cro,
                cro_withdrawn_total = EXCLUDED.cro_withdrawn_total,
                last_withdrawal = EXCLUDED.last_withdrawal,
                updated_at = NOW()
            "#,
            &[
                &account.user_id,
                &account.linked_wallet,
                &account.bank_cro.scaled(),
                &account.dirty_cro.scaled(),
                &account.cro_withdrawn_total.scaled(),
                &account.last_withdrawal,
            ],
        )
        .await?;

    info!("Account upserted: {}", account.user_id);
    Ok(())
}

// ============================================
// WITHDRAWAL QUERIES
// ============================================

/// Debit the account and insert a `pending` ledger row in one transaction.
///
/// The account row is locked before the balance and cooldown are checked,
/// so concurrent reservations for one account run one after another.
pub async fn reserve_withdrawal(
    pool: &Pool,
    request: &ReserveWithdrawal,
) -> Result<ReserveOutcome, DatabaseError> {
    debug!(
        "Reserving {} CRO for account: {}",
        request.amount, request.user_id
    );

    let mut client = client(pool).await?;
    let tx = client.transaction().await?;

    let row = tx
        .query_opt(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM bank_accounts WHERE user_id = $1 FOR UPDATE"),
            &[&request.user_id],
        )
        .await?;

    let Some(row) = row else {
        return Ok(ReserveOutcome::AccountMissing);
    };
    let account = row_to_account(&row)?;

    if let Err(rejection) = request.evaluate(&account) {
        return Ok(ReserveOutcome::Rejected(rejection));
    }

    let new_balance = account.bank_cro - request.amount;

    tx.execute(
        r#"
        UPDATE bank_accounts
        SET bank_cro = $2, last_withdrawal = $3, updated_at = NOW()
        WHERE user_id = $1
        "#,
        &[&request.user_id, &new_balance.scaled(), &request.now],
    )
    .await?;

    let row = tx
        .query_one(
            &format!(
                r#"
                INSERT INTO bank_withdrawals (user_id, address, amount, status, created_at, updated_at)
                VALUES ($1, $2, $3, 'pending', $4, $4)
                RETURNING {WITHDRAWAL_COLUMNS}
                "#
            ),
            &[
                &request.user_id,
                &request.address,
                &request.amount.scaled(),
                &request.now,
            ],
        )
        .await?;
    let withdrawal = row_to_withdrawal(&row)?;

    tx.commit().await?;

    Ok(ReserveOutcome::Reserved {
        withdrawal,
        new_balance,
    })
}

/// Advance a ledger row and apply its balance side effect in one transaction.
pub async fn transition_withdrawal(
    pool: &Pool,
    id: i64,
    next: WithdrawalStatus,
    txhash: Option<&str>,
    now: i64,
) -> Result<TransitionOutcome, DatabaseError> {
    debug!("Transitioning withdrawal {} to {}", id, next);

    let mut client = client(pool).await?;
    let tx = client.transaction().await?;

    let owner: Option<String> = tx
        .query_opt("SELECT user_id FROM bank_withdrawals WHERE id = $1", &[&id])
        .await?
        .map(|row| row.try_get("user_id"))
        .transpose()?;

    let Some(owner) = owner else {
        return Ok(TransitionOutcome::NotFound);
    };

    // Same lock order as reserve_withdrawal: account row, then ledger row.
    let account_exists = tx
        .query_opt(
            "SELECT user_id FROM bank_accounts WHERE user_id = $1 FOR UPDATE",
            &[&owner],
        )
        .await?
        .is_some();

    let row = tx
        .query_one(
            &format!("SELECT {WITHDRAWAL_COLUMNS} FROM bank_withdrawals WHERE id = $1 FOR UPDATE"),
            &[&id],
        )
        .await?;
    let current = row_to_withdrawal(&row)?;

    match plan_transition(current.status, next) {
        Err((from, to)) => return Ok(TransitionOutcome::Invalid { from, to }),
        Ok(false) => return Ok(TransitionOutcome::Unchanged(current)),
        Ok(true) => {}
    }

    if next.is_terminal() && !account_exists {
        error!(
            "Withdrawal {} belongs to missing account {}; refusing to move it to {}",
            id, owner, next
        );
        return Err(DatabaseError::CorruptRow(format!(
            "withdrawal {} has no account {}",
            id, owner
        )));
    }

    let stored_hash = if next == WithdrawalStatus::Completed {
        txhash
    } else {
        None
    };

    let row = tx
        .query_one(
            &format!(
                r#"
                UPDATE bank_withdrawals
                SET status = $2, updated_at = $3, txhash = COALESCE($4, txhash)
                WHERE id = $1
                RETURNING {WITHDRAWAL_COLUMNS}
                "#
            ),
            &[&id, &next.as_str(), &now, &stored_hash],
        )
        .await?;
    let updated = row_to_withdrawal(&row)?;

    match next {
        WithdrawalStatus::Completed => {
            tx.execute(
                r#"
                UPDATE bank_accounts
                SET cro_withdrawn_total = cro_withdrawn_total + $2, updated_at = NOW()
                WHERE user_id = $1
                "#,
                &[&owner, &updated.amount.scaled()],
            )
            .await?;
        }
        WithdrawalStatus::Failed => {
            tx.execute(
                r#"
                UPDATE bank_accounts
                SET bank_cro = bank_cro + $2, updated_at = NOW()
                WHERE user_id = $1
                "#,
                &[&owner, &updated.amount.scaled()],
            )
            .await?;
        }
        _ => {}
    }

    tx.commit().await?;

    info!("Withdrawal {} moved {} -> {}", id, current.status, next);
    Ok(TransitionOutcome::Applied(updated))
}

/// Non-terminal withdrawals for a user or an address, newest first.
pub async fn list_active_withdrawals(
    pool: &Pool,
    user_id: &str,
    address: &str,
    limit: i64,
) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
    debug!("Fetching active withdrawals for: {}", user_id);

    let address = normalize_identifier(address);
    let client = client(pool).await?;
    let rows = client
        .query(
            &active_withdrawals_sql(),
            &[&user_id, &address, &active_statuses(), &limit],
        )
        .await?;

    rows.iter().map(row_to_withdrawal).collect()
}

/// Withdrawals of any status for a user, newest first.
pub async fn list_recent_withdrawals(
    pool: &Pool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
    debug!("Fetching recent withdrawals for: {}", user_id);

    let client = client(pool).await?;
    let rows = client
        .query(
            &format!(
                r#"
                SELECT {WITHDRAWAL_COLUMNS}
                FROM bank_withdrawals
                WHERE user_id = $1
                ORDER BY id DESC
                LIMIT $2
                "#
            ),
            &[&user_id, &limit],
        )
        .await?;

    rows.iter().map(row_to_withdrawal).collect()
}

// ============================================
// HISTORY QUERIES
// ============================================

/// Append one history event and drop everything but the newest `max_retained`.
pub async fn append_history(
    pool: &Pool,
    user_id: &str,
    event: &HistoryEvent,
    max_retained: i64,
) -> Result<(), DatabaseError> {
    let mut client = client(pool).await?;
    let tx = client.transaction().await?;

    tx.execute(
        r#"
        INSERT INTO bank_account_history (user_id, event_type, amount, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
        &[
            &user_id,
            &event.event_type.as_str(),
            &event.amount.scaled(),
            &event.created_at,
        ],
    )
    .await?;

    tx.execute(
        r#"
        DELETE FROM bank_account_history
        WHERE user_id = $1
          AND id NOT IN (
              SELECT id FROM bank_account_history
              WHERE user_id = $1
              ORDER BY id DESC
              LIMIT $2
          )
        "#,
        &[&user_id, &max_retained],
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Newest-first history for a user.
pub async fn recent_history(
    pool: &Pool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<HistoryEvent>, DatabaseError> {
    let client = client(pool).await?;
    let rows = client.query(RECENT_HISTORY_SQL, &[&user_id, &limit]).await?;

    rows.iter().map(row_to_history).collect()
}
