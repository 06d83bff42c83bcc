//! Payout and transfer storage, plus per-chain nonce allocation.
//!
//! Nonce allocation uses the same `UPDATE ... RETURNING` increment as
//! the claim queries elsewhere in this crate: one round trip, no
//! read-then-write gap for two broadcasters on the same chain to race.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{
    BlockedReason, Payout, PayoutState, PayoutTransfer, TransferKind, TransferState,
};

use crate::error::{StoreError, StoreResult};
use crate::Store;

impl Store {
    pub async fn insert_payout(&self, payout: &Payout) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payouts (
                id, org_id, submission_id, worker_id, gross_cents, net_cents,
                platform_fee_cents, platform_fee_bps, platform_fee_wallet,
                proofwork_fee_cents, proofwork_fee_bps, proofwork_fee_wallet,
                provider, provider_reference, state, blocked_reason, hold_until,
                created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            "#,
        )
        .bind(payout.id)
        .bind(payout.org_id)
        .bind(payout.submission_id)
        .bind(payout.worker_id)
        .bind(payout.gross_cents)
        .bind(payout.net_cents)
        .bind(payout.platform_fee_cents)
        .bind(payout.platform_fee_bps)
        .bind(&payout.platform_fee_wallet)
        .bind(payout.proofwork_fee_cents)
        .bind(payout.proofwork_fee_bps)
        .bind(&payout.proofwork_fee_wallet)
        .bind(&payout.provider)
        .bind(&payout.provider_reference)
        .bind(payout_state_to_str(payout.state))
        .bind(payout.blocked_reason.map(blocked_reason_to_str))
        .bind(payout.hold_until)
        .bind(payout.created_at)
        .bind(payout.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_payout(&self, payout_id: Uuid) -> StoreResult<Payout> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, submission_id, worker_id, gross_cents, net_cents,
                   platform_fee_cents, platform_fee_bps, platform_fee_wallet,
                   proofwork_fee_cents, proofwork_fee_bps, proofwork_fee_wallet,
                   provider, provider_reference, state, blocked_reason, hold_until,
                   created_at, updated_at
            FROM payouts WHERE id = $1
            "#,
        )
        .bind(payout_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("payout {payout_id}")))?;
        row_to_payout(&row)
    }

    pub async fn set_payout_state(
        &self,
        payout_id: Uuid,
        state: PayoutState,
        blocked_reason: Option<BlockedReason>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE payouts SET state = $2, blocked_reason = $3, updated_at = now() WHERE id = $1",
        )
        .bind(payout_id)
        .bind(payout_state_to_str(state))
        .bind(blocked_reason.map(blocked_reason_to_str))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_payout_hold_until(&self, payout_id: Uuid, hold_until: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE payouts SET hold_until = $2, updated_at = now() WHERE id = $1")
            .bind(payout_id)
            .bind(hold_until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Payouts whose dispute-window hold has lapsed and are still
    /// pending: the set the settlement sweep should attempt next.
    pub async fn payouts_ready_for_settlement(&self, limit: i64) -> StoreResult<Vec<Payout>> {
        let rows = sqlx::query(
            r#"
            SELECT id, org_id, submission_id, worker_id, gross_cents, net_cents,
                   platform_fee_cents, platform_fee_bps, platform_fee_wallet,
                   proofwork_fee_cents, proofwork_fee_bps, proofwork_fee_wallet,
                   provider, provider_reference, state, blocked_reason, hold_until,
                   created_at, updated_at
            FROM payouts
            WHERE state = 'pending' AND (hold_until IS NULL OR hold_until <= now())
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_payout).collect()
    }

    /// Pending payouts held on `worker_payout_address_missing` for a
    /// given worker, so a successful address registration can unblock
    /// exactly the ones waiting on it.
    pub async fn payouts_blocked_on_missing_address(&self, worker_id: Uuid) -> StoreResult<Vec<Payout>> {
        let rows = sqlx::query(
            r#"
            SELECT id, org_id, submission_id, worker_id, gross_cents, net_cents,
                   platform_fee_cents, platform_fee_bps, platform_fee_wallet,
                   proofwork_fee_cents, proofwork_fee_bps, proofwork_fee_wallet,
                   provider, provider_reference, state, blocked_reason, hold_until,
                   created_at, updated_at
            FROM payouts
            WHERE worker_id = $1 AND blocked_reason = 'worker_payout_address_missing'
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_payout).collect()
    }

    pub async fn insert_transfer(&self, transfer: &PayoutTransfer) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payout_transfers (
                id, payout_id, kind, from_address, to_address, token_id,
                amount_base_units, tx_hash, nonce, state, created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.payout_id)
        .bind(transfer_kind_to_str(transfer.kind))
        .bind(&transfer.from_address)
        .bind(&transfer.to_address)
        .bind(&transfer.token_id)
        .bind(&transfer.amount_base_units)
        .bind(&transfer.tx_hash)
        .bind(transfer.nonce)
        .bind(transfer_state_to_str(transfer.state))
        .bind(transfer.created_at)
        .bind(transfer.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_transfer_state(&self, transfer_id: Uuid, state: TransferState) -> StoreResult<()> {
        sqlx::query("UPDATE payout_transfers SET state = $2, updated_at = now() WHERE id = $1")
            .bind(transfer_id)
            .bind(transfer_state_to_str(state))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn transfers_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<PayoutTransfer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payout_id, kind, from_address, to_address, token_id,
                   amount_base_units, tx_hash, nonce, state, created_at, updated_at
            FROM payout_transfers WHERE payout_id = $1 ORDER BY created_at ASC
            "#,
        )
        .bind(payout_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transfer).collect()
    }

    /// Allocate the next nonce for `chain_id` in one round trip,
    /// inserting the counter at 0 the first time a chain is used.
    pub async fn allocate_next_nonce(&self, chain_id: i64) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO crypto_nonces (chain_id, next_nonce)
            VALUES ($1, 1)
            ON CONFLICT (chain_id) DO UPDATE SET next_nonce = crypto_nonces.next_nonce + 1
            RETURNING next_nonce - 1 AS allocated
            "#,
        )
        .bind(chain_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("allocated")?)
    }

    /// Reconcile the local nonce counter against a chain-observed value
    /// (e.g. after a process restart), never moving it backwards.
    pub async fn reconcile_nonce_floor(&self, chain_id: i64, observed_next: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO crypto_nonces (chain_id, next_nonce)
            VALUES ($1, $2)
            ON CONFLICT (chain_id) DO UPDATE
            SET next_nonce = GREATEST(crypto_nonces.next_nonce, $2)
            "#,
        )
        .bind(chain_id)
        .bind(observed_next)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_payout(row: &sqlx::postgres::PgRow) -> StoreResult<Payout> {
    let state: String = row.try_get("state")?;
    let blocked_reason: Option<String> = row.try_get("blocked_reason")?;
    Ok(Payout {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        submission_id: row.try_get("submission_id")?,
        worker_id: row.try_get("worker_id")?,
        gross_cents: row.try_get("gross_cents")?,
        net_cents: row.try_get("net_cents")?,
        platform_fee_cents: row.try_get("platform_fee_cents")?,
        platform_fee_bps: row.try_get("platform_fee_bps")?,
        platform_fee_wallet: row.try_get("platform_fee_wallet")?,
        proofwork_fee_cents: row.try_get("proofwork_fee_cents")?,
        proofwork_fee_bps: row.try_get("proofwork_fee_bps")?,
        proofwork_fee_wallet: row.try_get("proofwork_fee_wallet")?,
        provider: row.try_get("provider")?,
        provider_reference: row.try_get("provider_reference")?,
        state: str_to_payout_state(&state)?,
        blocked_reason: blocked_reason.map(|b| str_to_blocked_reason(&b)).transpose()?,
        hold_until: row.try_get::<Option<DateTime<Utc>>, _>("hold_until")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transfer(row: &sqlx::postgres::PgRow) -> StoreResult<PayoutTransfer> {
    let kind: String = row.try_get("kind")?;
    let state: String = row.try_get("state")?;
    Ok(PayoutTransfer {
        id: row.try_get("id")?,
        payout_id: row.try_get("payout_id")?,
        kind: str_to_transfer_kind(&kind)?,
        from_address: row.try_get("from_address")?,
        to_address: row.try_get("to_address")?,
        token_id: row.try_get("token_id")?,
        amount_base_units: row.try_get("amount_base_units")?,
        tx_hash: row.try_get("tx_hash")?,
        nonce: row.try_get("nonce")?,
        state: str_to_transfer_state(&state)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payout_state_to_str(s: PayoutState) -> &'static str {
    match s {
        PayoutState::Pending => "pending",
        PayoutState::Paid => "paid",
        PayoutState::Failed => "failed",
        PayoutState::Refunded => "refunded",
    }
}

fn str_to_payout_state(s: &str) -> StoreResult<PayoutState> {
    Ok(match s {
        "pending" => PayoutState::Pending,
        "paid" => PayoutState::Paid,
        "failed" => PayoutState::Failed,
        "refunded" => PayoutState::Refunded,
        other => return Err(StoreError::InvalidData(format!("unknown payout state '{other}'"))),
    })
}

fn blocked_reason_to_str(r: BlockedReason) -> &'static str {
    match r {
        BlockedReason::WorkerPayoutAddressMissing => "worker_payout_address_missing",
        BlockedReason::DisputeOpen => "dispute_open",
        BlockedReason::InsufficientFunds => "insufficient_funds",
    }
}

fn str_to_blocked_reason(s: &str) -> StoreResult<BlockedReason> {
    Ok(match s {
        "worker_payout_address_missing" => BlockedReason::WorkerPayoutAddressMissing,
        "dispute_open" => BlockedReason::DisputeOpen,
        "insufficient_funds" => BlockedReason::InsufficientFunds,
        other => return Err(StoreError::InvalidData(format!("unknown blocked reason '{other}'"))),
    })
}

fn transfer_kind_to_str(k: TransferKind) -> &'static str {
    match k {
        TransferKind::Net => "net",
        TransferKind::PlatformFee => "platform_fee",
        TransferKind::ProofworkFee => "proofwork_fee",
    }
}

fn str_to_transfer_kind(s: &str) -> StoreResult<TransferKind> {
    Ok(match s {
        "net" => TransferKind::Net,
        "platform_fee" => TransferKind::PlatformFee,
        "proofwork_fee" => TransferKind::ProofworkFee,
        other => return Err(StoreError::InvalidData(format!("unknown transfer kind '{other}'"))),
    })
}

fn transfer_state_to_str(s: TransferState) -> &'static str {
    match s {
        TransferState::Broadcast => "broadcast",
        TransferState::Confirmed => "confirmed",
        TransferState::Failed => "failed",
    }
}

fn str_to_transfer_state(s: &str) -> StoreResult<TransferState> {
    Ok(match s {
        "broadcast" => TransferState::Broadcast,
        "confirmed" => TransferState::Confirmed,
        "failed" => TransferState::Failed,
        other => return Err(StoreError::InvalidData(format!("unknown transfer state '{other}'"))),
    })
}
