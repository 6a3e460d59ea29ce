//! The admin processor: balance adjustments, prize payouts and claw-backs,
//! account standing changes, and tournament management.
//!
//! Every mutation here is a privileged action, so each one ends with an audit
//! entry. The audit log is not optional: when the append fails, the whole
//! operation is rolled back through compensating writes and reported as
//! failed, so no admin mutation ever survives unrecorded.

use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::database::models::{
    Account, AccountStatus, AuditAction, AuditFilter, AuditLogEntry, BalanceDelta, Currency,
    NewAuditEntry, NewTransaction, Participation, Tournament, TournamentSpec, Transaction,
    TransactionKind,
};
use crate::database::LedgerStore;
use crate::error::{LedgerError, LedgerResult};

const MAX_COMMIT_ATTEMPTS: u32 = 4;
const RETRY_BASE_DELAY_MS: u64 = 25;

/// Why an admin is moving a user's balances. A `Reward` is a grant to an
/// active player; a `CurrencyEdit` is a correction and works on any account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentKind {
    CurrencyEdit,
    Reward,
}

/// An admin-initiated balance adjustment.
#[derive(Debug, Clone)]
pub struct Adjustment {
    pub target: Uuid,
    pub delta: BalanceDelta,
    pub kind: AdjustmentKind,
    pub reason: Option<String>,
    pub request_id: Uuid,
}

/// Processes privileged administrative operations on top of any
/// [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct AdminProcessor<DB> {
    db: DB,
}

impl<DB: LedgerStore> AdminProcessor<DB> {
    pub fn new(db: DB) -> Self {
        AdminProcessor { db }
    }

    /// Applies a signed multi-currency adjustment to a user's wallet,
    /// appending one ledger entry per affected currency and one audit entry.
    ///
    /// Replaying the same `request_id` returns the current account without
    /// applying anything again.
    #[instrument(skip(self, adjustment), fields(admin = %admin_id, target = %adjustment.target))]
    pub async fn adjust_balance(
        &self,
        admin_id: Uuid,
        adjustment: &Adjustment,
    ) -> LedgerResult<Account> {
        if adjustment.delta.is_empty() {
            return Err(LedgerError::InvalidAmount);
        }
        if self.db.find_by_request(adjustment.request_id).await?.is_some() {
            info!("adjustment already applied, replay resolved from the ledger");
            return self
                .db
                .get_account(adjustment.target)
                .await?
                .ok_or(LedgerError::AccountNotFound(adjustment.target));
        }

        let account = self
            .db
            .get_account(adjustment.target)
            .await?
            .ok_or(LedgerError::AccountNotFound(adjustment.target))?;
        if adjustment.kind == AdjustmentKind::Reward && account.status != AccountStatus::Active {
            return Err(LedgerError::AccountInactive);
        }

        let (before, after) = self
            .apply_with_retry(adjustment.target, &adjustment.delta)
            .await
            .map_err(|e| match e {
                // An admin edit that would take a balance negative is a bad
                // request, not a funds problem of the user's making.
                LedgerError::InsufficientFunds => LedgerError::NegativeBalance,
                other => other,
            })?;

        let description = adjustment.reason.clone().unwrap_or_else(|| {
            match adjustment.kind {
                AdjustmentKind::Reward => "Admin reward",
                AdjustmentKind::CurrencyEdit => "Admin currency edit",
            }
            .to_owned()
        });
        let appended = self
            .append_adjustment_transactions(adjustment, &description)
            .await;
        let appended = match appended {
            Ok(appended) => appended,
            Err((appended, e)) => {
                self.reverse_transactions(&appended).await;
                self.void_request_marker(adjustment.request_id).await;
                self.compensate_delta(adjustment.target, &adjustment.delta).await;
                return Err(e);
            }
        };

        let action = match adjustment.kind {
            AdjustmentKind::Reward => AuditAction::RewardGiven,
            AdjustmentKind::CurrencyEdit => AuditAction::UserCurrencyEdit,
        };
        let audit = NewAuditEntry {
            admin_id,
            action,
            details: json!({
                "target_user_id": adjustment.target,
                "delta": adjustment.delta,
                "balance_before": before,
                "balance_after": after,
                "reason": adjustment.reason,
            }),
        };
        if let Err(e) = self.db.append_audit(&audit).await {
            error!(error = %e, "audit append failed, rolling the adjustment back");
            self.reverse_transactions(&appended).await;
            self.void_request_marker(adjustment.request_id).await;
            self.compensate_delta(adjustment.target, &adjustment.delta).await;
            return Err(LedgerError::AuditFailed);
        }

        info!(action = %action, "balance adjustment committed");
        Ok(after)
    }

    /// Moves an account between `active`, `suspended` and `banned`.
    /// A banned account must be reactivated before it can be suspended, and
    /// setting the current status again is rejected.
    #[instrument(skip(self))]
    pub async fn set_account_status(
        &self,
        admin_id: Uuid,
        target: Uuid,
        status: AccountStatus,
    ) -> LedgerResult<Account> {
        let account = self
            .db
            .get_account(target)
            .await?
            .ok_or(LedgerError::AccountNotFound(target))?;

        let allowed = matches!(
            (account.status, status),
            (AccountStatus::Active, AccountStatus::Suspended)
                | (AccountStatus::Active, AccountStatus::Banned)
                | (AccountStatus::Suspended, AccountStatus::Active)
                | (AccountStatus::Suspended, AccountStatus::Banned)
                | (AccountStatus::Banned, AccountStatus::Active)
        );
        if !allowed {
            return Err(LedgerError::InvalidStatusChange(account.status, status));
        }

        // Conditional on the status just read, so a concurrent status change
        // surfaces as a conflict instead of committing a stale transition.
        let updated = self.db.set_status(target, status, account.status).await?;

        let action = match status {
            AccountStatus::Banned => AuditAction::UserBan,
            AccountStatus::Suspended => AuditAction::UserSuspend,
            AccountStatus::Active => AuditAction::UserActivate,
        };
        let audit = NewAuditEntry {
            admin_id,
            action,
            details: json!({
                "target_user_id": target,
                "from": account.status,
                "to": status,
            }),
        };
        if let Err(e) = self.db.append_audit(&audit).await {
            error!(error = %e, "audit append failed, restoring previous status");
            if let Err(e) = self.db.set_status(target, account.status, status).await {
                error!(error = %e, "failed to restore previous account status");
            }
            return Err(LedgerError::AuditFailed);
        }

        info!(action = %action, "account status changed");
        Ok(updated)
    }

    /// Pays a prize to a participant: credits their cash wallet, accumulates
    /// `prize_won`, marks the win tag, and records the payout.
    #[instrument(skip(self))]
    pub async fn send_prize(
        &self,
        admin_id: Uuid,
        participation_id: Uuid,
        amount: Decimal,
        request_id: Uuid,
    ) -> LedgerResult<Participation> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.db.find_by_request(request_id).await?.is_some() {
            info!("prize already sent, replay resolved from the ledger");
            return self
                .db
                .get_participation_by_id(participation_id)
                .await?
                .ok_or(LedgerError::ParticipationNotFound(participation_id));
        }

        let participation = self
            .db
            .get_participation_by_id(participation_id)
            .await?
            .ok_or(LedgerError::ParticipationNotFound(participation_id))?;
        let tournament = self
            .db
            .get_tournament(participation.tournament_id)
            .await?
            .ok_or(LedgerError::TournamentNotFound(participation.tournament_id))?;

        let delta = BalanceDelta::real(amount);
        self.apply_with_retry(participation.account_id, &delta).await?;

        let updated = match self.db.adjust_prize(participation_id, amount, true).await {
            Ok(updated) => updated,
            Err(e) => {
                self.compensate_delta(participation.account_id, &delta).await;
                return Err(e);
            }
        };

        let entry = NewTransaction {
            account_id: participation.account_id,
            amount,
            currency: Currency::Real,
            kind: TransactionKind::TournamentWin,
            description: format!("Prize from tournament: {}", tournament.name),
            tournament_id: Some(tournament.id),
            request_id: Some(request_id),
        };
        let transaction = match self.db.append_transaction(&entry).await {
            Ok(transaction) => transaction,
            Err(e) => {
                self.compensate_prize(participation_id, amount).await;
                self.compensate_delta(participation.account_id, &delta).await;
                return Err(e);
            }
        };

        let audit = NewAuditEntry {
            admin_id,
            action: AuditAction::MoneySent,
            details: json!({
                "target_user_id": participation.account_id,
                "tournament_id": tournament.id,
                "participation_id": participation_id,
                "amount": amount,
            }),
        };
        if let Err(e) = self.db.append_audit(&audit).await {
            error!(error = %e, "audit append failed, rolling the payout back");
            self.reverse_transactions(std::slice::from_ref(&transaction)).await;
            self.void_request_marker(request_id).await;
            self.compensate_prize(participation_id, amount).await;
            self.compensate_delta(participation.account_id, &delta).await;
            return Err(LedgerError::AuditFailed);
        }

        info!(amount = %amount, "prize sent");
        Ok(updated)
    }

    /// Takes back part or all of a previously sent prize. The amount must not
    /// exceed what the participant has won, and the debit fails with
    /// `InsufficientFunds` if they have already spent the cash.
    #[instrument(skip(self))]
    pub async fn clawback_prize(
        &self,
        admin_id: Uuid,
        participation_id: Uuid,
        amount: Decimal,
        request_id: Uuid,
    ) -> LedgerResult<Participation> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.db.find_by_request(request_id).await?.is_some() {
            info!("claw-back already applied, replay resolved from the ledger");
            return self
                .db
                .get_participation_by_id(participation_id)
                .await?
                .ok_or(LedgerError::ParticipationNotFound(participation_id));
        }

        let participation = self
            .db
            .get_participation_by_id(participation_id)
            .await?
            .ok_or(LedgerError::ParticipationNotFound(participation_id))?;
        if amount > participation.prize_won {
            return Err(LedgerError::InvalidAmount);
        }
        let tournament = self
            .db
            .get_tournament(participation.tournament_id)
            .await?
            .ok_or(LedgerError::TournamentNotFound(participation.tournament_id))?;

        let delta = BalanceDelta::real(-amount);
        self.apply_with_retry(participation.account_id, &delta).await?;

        let updated = match self.db.adjust_prize(participation_id, -amount, false).await {
            Ok(updated) => updated,
            Err(e) => {
                self.compensate_delta(participation.account_id, &delta).await;
                return Err(e);
            }
        };

        let entry = NewTransaction {
            account_id: participation.account_id,
            amount: -amount,
            currency: Currency::Real,
            kind: TransactionKind::AdminDebit,
            description: format!("Money taken back from tournament: {}", tournament.name),
            tournament_id: Some(tournament.id),
            request_id: Some(request_id),
        };
        let transaction = match self.db.append_transaction(&entry).await {
            Ok(transaction) => transaction,
            Err(e) => {
                self.compensate_prize(participation_id, -amount).await;
                self.compensate_delta(participation.account_id, &delta).await;
                return Err(e);
            }
        };

        let audit = NewAuditEntry {
            admin_id,
            action: AuditAction::MoneyTaken,
            details: json!({
                "target_user_id": participation.account_id,
                "tournament_id": tournament.id,
                "participation_id": participation_id,
                "amount": amount,
            }),
        };
        if let Err(e) = self.db.append_audit(&audit).await {
            error!(error = %e, "audit append failed, rolling the claw-back back");
            self.reverse_transactions(std::slice::from_ref(&transaction)).await;
            self.void_request_marker(request_id).await;
            self.compensate_prize(participation_id, -amount).await;
            self.compensate_delta(participation.account_id, &delta).await;
            return Err(LedgerError::AuditFailed);
        }

        info!(amount = %amount, "prize clawed back");
        Ok(updated)
    }

    /// Creates a tournament. Room credentials become visible five minutes
    /// before the start time.
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn create_tournament(
        &self,
        admin_id: Uuid,
        spec: &TournamentSpec,
    ) -> LedgerResult<Tournament> {
        validate_spec(spec)?;
        let tournament = self.db.insert_tournament(spec).await?;

        let audit = NewAuditEntry {
            admin_id,
            action: AuditAction::TournamentCreate,
            details: json!({ "tournament_id": tournament.id, "spec": spec }),
        };
        if let Err(e) = self.db.append_audit(&audit).await {
            error!(error = %e, "audit append failed, removing the new tournament");
            if let Err(e) = self.db.delete_tournament(tournament.id).await {
                error!(error = %e, "failed to remove unaudited tournament");
            }
            return Err(LedgerError::AuditFailed);
        }

        info!(tournament = %tournament.id, "tournament created");
        Ok(tournament)
    }

    /// Replaces a tournament's definition. Shrinking the capacity below the
    /// current occupancy is rejected.
    #[instrument(skip(self, spec))]
    pub async fn edit_tournament(
        &self,
        admin_id: Uuid,
        tournament_id: Uuid,
        spec: &TournamentSpec,
    ) -> LedgerResult<Tournament> {
        validate_spec(spec)?;
        let before = self
            .db
            .get_tournament(tournament_id)
            .await?
            .ok_or(LedgerError::TournamentNotFound(tournament_id))?;

        let updated = self.db.update_tournament(tournament_id, spec).await?;

        let audit = NewAuditEntry {
            admin_id,
            action: AuditAction::TournamentEdit,
            details: json!({ "tournament_id": tournament_id, "before": before, "after": updated }),
        };
        if let Err(e) = self.db.append_audit(&audit).await {
            error!(error = %e, "audit append failed, restoring previous definition");
            if let Err(e) = self
                .db
                .update_tournament(tournament_id, &spec_of(&before))
                .await
            {
                error!(error = %e, "failed to restore previous tournament definition");
            }
            return Err(LedgerError::AuditFailed);
        }

        info!(tournament = %tournament_id, "tournament edited");
        Ok(updated)
    }

    /// Deletes a tournament and its participations.
    #[instrument(skip(self))]
    pub async fn delete_tournament(&self, admin_id: Uuid, tournament_id: Uuid) -> LedgerResult<()> {
        let before = self
            .db
            .get_tournament(tournament_id)
            .await?
            .ok_or(LedgerError::TournamentNotFound(tournament_id))?;

        self.db.delete_tournament(tournament_id).await?;

        let audit = NewAuditEntry {
            admin_id,
            action: AuditAction::TournamentDelete,
            details: json!({ "tournament_id": tournament_id, "tournament": before }),
        };
        if let Err(e) = self.db.append_audit(&audit).await {
            // The definition can be re-created, but cascaded participations
            // are gone and the restored tournament gets a fresh id.
            error!(error = %e, "audit append failed after delete, re-creating the definition");
            if let Err(e) = self.db.insert_tournament(&spec_of(&before)).await {
                error!(error = %e, "failed to re-create deleted tournament");
            }
            return Err(LedgerError::AuditFailed);
        }

        info!(tournament = %tournament_id, "tournament deleted");
        Ok(())
    }

    /// Reads the audit log, newest first.
    pub async fn list_audit_log(&self, filter: &AuditFilter) -> LedgerResult<Vec<AuditLogEntry>> {
        self.db.query_audit(filter).await
    }

    /// Reads a tournament's participants in seat order.
    pub async fn list_participants(&self, tournament_id: Uuid) -> LedgerResult<Vec<Participation>> {
        self.db.list_participants(tournament_id).await
    }

    /// Appends one ledger entry per affected currency. The idempotency key
    /// rides on the first entry only, since it is unique per request.
    /// On failure, returns the entries that did get appended so the caller
    /// can reverse them.
    async fn append_adjustment_transactions(
        &self,
        adjustment: &Adjustment,
        description: &str,
    ) -> Result<Vec<Transaction>, (Vec<Transaction>, LedgerError)> {
        let mut appended = Vec::new();
        for (i, (currency, amount)) in adjustment.delta.entries().into_iter().enumerate() {
            let kind = if amount > Decimal::ZERO {
                TransactionKind::AdminCredit
            } else {
                TransactionKind::AdminDebit
            };
            let entry = NewTransaction {
                account_id: adjustment.target,
                amount,
                currency,
                kind,
                description: description.to_owned(),
                tournament_id: None,
                request_id: (i == 0).then_some(adjustment.request_id),
            };
            match self.db.append_transaction(&entry).await {
                Ok(transaction) => appended.push(transaction),
                Err(e) => return Err((appended, e)),
            }
        }
        Ok(appended)
    }

    /// Applies a delta with a fresh read per attempt, retrying lost races a
    /// bounded number of times. Returns the account before and after.
    async fn apply_with_retry(
        &self,
        account_id: Uuid,
        delta: &BalanceDelta,
    ) -> LedgerResult<(Account, Account)> {
        let mut attempt = 0;
        loop {
            let before = self
                .db
                .get_account(account_id)
                .await?
                .ok_or(LedgerError::AccountNotFound(account_id))?;
            match self.db.apply_delta(account_id, delta, before.version).await {
                Ok(after) => return Ok((before, after)),
                Err(e) if e.is_retryable() && attempt + 1 < MAX_COMMIT_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY_MS << attempt;
                    warn!(attempt, delay_ms = delay, "adjustment lost a concurrent race, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort reversal of an already-applied delta. A failure here is
    /// logged and swallowed: the caller is already on an error path.
    async fn compensate_delta(&self, account_id: Uuid, delta: &BalanceDelta) {
        if let Err(e) = self.apply_with_retry(account_id, &delta.negated()).await {
            error!(%account_id, error = %e, "failed to compensate balance delta");
        }
    }

    /// Detaches the idempotency key from a rolled-back operation so a retry
    /// with the same key is applied instead of resolved as a replay.
    async fn void_request_marker(&self, request_id: Uuid) {
        if let Err(e) = self.db.void_request(request_id).await {
            error!(%request_id, error = %e, "failed to detach idempotency key on rollback");
        }
    }

    /// Best-effort reversal of an already-applied prize adjustment.
    async fn compensate_prize(&self, participation_id: Uuid, amount: Decimal) {
        if let Err(e) = self.db.adjust_prize(participation_id, -amount, false).await {
            error!(%participation_id, error = %e, "failed to compensate prize adjustment");
        }
    }

    /// Appends reversing ledger entries for transactions whose operation was
    /// rolled back, keeping per-currency history in step with the balances.
    async fn reverse_transactions(&self, transactions: &[Transaction]) {
        for tx in transactions {
            let kind = match tx.kind {
                TransactionKind::AdminCredit | TransactionKind::TournamentWin => {
                    TransactionKind::AdminDebit
                }
                TransactionKind::AdminDebit | TransactionKind::TournamentEntry => {
                    TransactionKind::AdminCredit
                }
            };
            let reversal = NewTransaction {
                account_id: tx.account_id,
                amount: -tx.amount,
                currency: tx.currency,
                kind,
                description: format!("Reversal: {}", tx.description),
                tournament_id: tx.tournament_id,
                request_id: None,
            };
            if let Err(e) = self.db.append_transaction(&reversal).await {
                error!(transaction = tx.id, error = %e, "failed to append reversing entry");
            }
        }
    }
}

fn validate_spec(spec: &TournamentSpec) -> LedgerResult<()> {
    if spec.name.trim().is_empty() {
        return Err(LedgerError::InvalidName);
    }
    if spec.max_participants <= 0 {
        return Err(LedgerError::InvalidCapacity);
    }
    if spec.entry_fee < Decimal::ZERO || spec.prize_pool < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

fn spec_of(tournament: &Tournament) -> TournamentSpec {
    TournamentSpec {
        name: tournament.name.clone(),
        game: tournament.game.clone(),
        description: tournament.description.clone(),
        rules: tournament.rules.clone(),
        entry_fee: tournament.entry_fee,
        prize_pool: tournament.prize_pool,
        max_participants: tournament.max_participants,
        status: tournament.status,
        start_time: tournament.start_time,
        room_id: tournament.room_id.clone(),
        room_password: tournament.room_password.clone(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::{TournamentStatus, VoucherDenomination};
    use crate::database::{
        AccountStore, AuditStore, ParticipationStore, TournamentStore, TransactionStore,
    };
    use crate::ledger::{EntryProcessor, JoinRequest};

    fn admin() -> Uuid {
        Uuid::new_v4()
    }

    fn spec(name: &str, entry_fee: Decimal, max_participants: i32) -> TournamentSpec {
        TournamentSpec {
            name: name.to_owned(),
            game: "Brawl Stars".to_owned(),
            description: None,
            rules: None,
            entry_fee,
            prize_pool: dec!(0),
            max_participants,
            status: TournamentStatus::Upcoming,
            start_time: Utc::now() + ChronoDuration::hours(2),
            room_id: None,
            room_password: None,
        }
    }

    fn reward(target: Uuid, delta: BalanceDelta) -> Adjustment {
        Adjustment {
            target,
            delta,
            kind: AdjustmentKind::Reward,
            reason: None,
            request_id: Uuid::new_v4(),
        }
    }

    async fn joined_participant(
        db: &MemoryStore,
        entry_fee: Decimal,
    ) -> (Tournament, Account, Participation) {
        let tournament = db.insert_tournament(&spec("Cup", entry_fee, 8)).await.unwrap();
        let account = db.create_account("player").await.unwrap();
        let account = db
            .apply_delta(account.id, &BalanceDelta::real(dec!(100)), account.version)
            .await
            .unwrap();
        let entry = EntryProcessor::new(db.clone());
        let participation = entry
            .join_tournament(&JoinRequest {
                tournament_id: tournament.id,
                account_id: account.id,
                in_game_name: "Ace".to_owned(),
                voucher: None,
                request_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        (tournament, account, participation)
    }

    #[tokio::test]
    async fn multi_currency_edit_writes_one_transaction_per_currency() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();
        db.apply_delta(account.id, &BalanceDelta::real(dec!(40)), account.version)
            .await
            .unwrap();

        let mut delta = BalanceDelta::real(dec!(-15));
        delta.gems = 100;
        delta.vouchers_50 = 2;
        let adjustment = Adjustment {
            target: account.id,
            delta,
            kind: AdjustmentKind::CurrencyEdit,
            reason: Some("support ticket #4417".to_owned()),
            request_id: Uuid::new_v4(),
        };
        let after = processor.adjust_balance(admin(), &adjustment).await.unwrap();

        assert_eq!(after.wallet_real, dec!(25));
        assert_eq!(after.wallet_gems, 100);
        assert_eq!(after.wallet_vouchers_50, 2);

        let history = db.list_transactions(account.id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|t| t.description == "support ticket #4417"));
        let debits = history
            .iter()
            .filter(|t| t.kind == TransactionKind::AdminDebit)
            .count();
        assert_eq!(debits, 1);
        assert_eq!(
            history.iter().filter(|t| t.request_id.is_some()).count(),
            1
        );

        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, AuditAction::UserCurrencyEdit);
    }

    #[tokio::test]
    async fn reward_to_suspended_account_is_rejected() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();
        db.set_status(account.id, AccountStatus::Suspended, AccountStatus::Active)
            .await
            .unwrap();

        let err = processor
            .adjust_balance(admin(), &reward(account.id, BalanceDelta::real(dec!(10))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_INACTIVE");

        // A currency edit on the same account is still allowed.
        let edit = Adjustment {
            kind: AdjustmentKind::CurrencyEdit,
            ..reward(account.id, BalanceDelta::real(dec!(10)))
        };
        processor.adjust_balance(admin(), &edit).await.unwrap();
    }

    #[tokio::test]
    async fn edit_that_would_go_negative_is_rejected_as_negative_balance() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();
        db.apply_delta(account.id, &BalanceDelta::real(dec!(5)), account.version)
            .await
            .unwrap();

        let edit = Adjustment {
            kind: AdjustmentKind::CurrencyEdit,
            ..reward(account.id, BalanceDelta::real(dec!(-10)))
        };
        let err = processor.adjust_balance(admin(), &edit).await.unwrap_err();
        assert_eq!(err.code(), "NEGATIVE_BALANCE");

        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.wallet_real, dec!(5));
    }

    #[tokio::test]
    async fn empty_adjustment_is_rejected() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();

        let err = processor
            .adjust_balance(admin(), &reward(account.id, BalanceDelta::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn replaying_an_adjustment_request_applies_it_once() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();

        let adjustment = reward(account.id, BalanceDelta::real(dec!(25)));
        processor.adjust_balance(admin(), &adjustment).await.unwrap();
        let replay = processor.adjust_balance(admin(), &adjustment).await.unwrap();

        assert_eq!(replay.wallet_real, dec!(25));
        assert_eq!(db.list_transactions(account.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_audit_rolls_an_adjustment_back() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();
        db.apply_delta(
            account.id,
            &BalanceDelta::voucher(VoucherDenomination::Twenty, 1),
            account.version,
        )
        .await
        .unwrap();

        db.fail_next_audit().await;
        let err = processor
            .adjust_balance(admin(), &reward(account.id, BalanceDelta::real(dec!(99))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUDIT_FAILED");

        // Balances are back where they started and the reversal is on the
        // ledger, so history still reconciles.
        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.wallet_real, dec!(0));
        assert_eq!(account.wallet_vouchers_20, 1);

        let history = db.list_transactions(account.id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        let net: Decimal = history.iter().map(|t| t.amount).sum();
        assert_eq!(net, dec!(0));
        assert!(db.query_audit(&AuditFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adjustment_retry_succeeds_after_a_failed_audit() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();

        let adjustment = reward(account.id, BalanceDelta::real(dec!(40)));
        db.fail_next_audit().await;
        let err = processor.adjust_balance(admin(), &adjustment).await.unwrap_err();
        assert_eq!(err.code(), "AUDIT_FAILED");

        // The rolled-back attempt no longer counts as applied: the same key
        // goes through on retry and is audited this time.
        let after = processor.adjust_balance(admin(), &adjustment).await.unwrap();
        assert_eq!(after.wallet_real, dec!(40));

        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, AuditAction::RewardGiven);

        // Original, reversal, and the retried entry; history reconciles.
        let history = db.list_transactions(account.id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        let net: Decimal = history.iter().map(|t| t.amount).sum();
        assert_eq!(net, dec!(40));
    }

    #[tokio::test]
    async fn prize_retry_succeeds_after_a_failed_audit() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let (_, account, participation) = joined_participant(&db, dec!(0)).await;

        let request_id = Uuid::new_v4();
        db.fail_next_audit().await;
        let err = processor
            .send_prize(admin(), participation.id, dec!(200), request_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUDIT_FAILED");
        let rolled_back = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(rolled_back.wallet_real, dec!(100));

        let updated = processor
            .send_prize(admin(), participation.id, dec!(200), request_id)
            .await
            .unwrap();
        assert_eq!(updated.prize_won, dec!(200));

        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.wallet_real, dec!(300));
        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, AuditAction::MoneySent);
    }

    #[tokio::test]
    async fn status_transitions_follow_the_allowed_table() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();

        let suspended = processor
            .set_account_status(admin(), account.id, AccountStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(suspended.status, AccountStatus::Suspended);

        // Same status again is rejected.
        let err = processor
            .set_account_status(admin(), account.id, AccountStatus::Suspended)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS_CHANGE");

        let banned = processor
            .set_account_status(admin(), account.id, AccountStatus::Banned)
            .await
            .unwrap();
        assert_eq!(banned.status, AccountStatus::Banned);

        // A banned account cannot be softened to suspended.
        let err = processor
            .set_account_status(admin(), account.id, AccountStatus::Suspended)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS_CHANGE");

        processor
            .set_account_status(admin(), account.id, AccountStatus::Active)
            .await
            .unwrap();

        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        let actions: Vec<AuditAction> = audits.iter().rev().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::UserSuspend,
                AuditAction::UserBan,
                AuditAction::UserActivate,
            ]
        );
    }

    #[tokio::test]
    async fn failed_audit_restores_the_previous_status() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();

        db.fail_next_audit().await;
        let err = processor
            .set_account_status(admin(), account.id, AccountStatus::Banned)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUDIT_FAILED");

        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn status_write_from_a_stale_read_is_rejected() {
        let db = MemoryStore::new();
        let account = db.create_account("player").await.unwrap();

        // Two writers both read `active`. The first commits a ban; the
        // second is now working from a state that no longer exists and must
        // lose rather than soften the ban to a suspension.
        db.set_status(account.id, AccountStatus::Banned, AccountStatus::Active)
            .await
            .unwrap();
        let err = db
            .set_status(account.id, AccountStatus::Suspended, AccountStatus::Active)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VERSION_CONFLICT");

        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Banned);
    }

    #[tokio::test]
    async fn prize_send_credits_wallet_and_marks_the_win() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let (_, account, participation) = joined_participant(&db, dec!(20)).await;

        let request_id = Uuid::new_v4();
        let updated = processor
            .send_prize(admin(), participation.id, dec!(500), request_id)
            .await
            .unwrap();
        assert_eq!(updated.prize_won, dec!(500));
        assert!(updated.win_tag_given);

        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.wallet_real, dec!(580));

        let history = db.list_transactions(account.id, 10).await.unwrap();
        assert_eq!(history[0].kind, TransactionKind::TournamentWin);
        assert_eq!(history[0].description, "Prize from tournament: Cup");

        // Replay pays nothing extra.
        processor
            .send_prize(admin(), participation.id, dec!(500), request_id)
            .await
            .unwrap();
        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.wallet_real, dec!(580));

        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits[0].action, AuditAction::MoneySent);
    }

    #[tokio::test]
    async fn clawback_cannot_exceed_the_prize_and_debits_the_wallet() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let (_, account, participation) = joined_participant(&db, dec!(0)).await;

        processor
            .send_prize(admin(), participation.id, dec!(200), Uuid::new_v4())
            .await
            .unwrap();

        let err = processor
            .clawback_prize(admin(), participation.id, dec!(300), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        let updated = processor
            .clawback_prize(admin(), participation.id, dec!(150), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(updated.prize_won, dec!(50));

        let account = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(account.wallet_real, dec!(150));

        let history = db.list_transactions(account.id, 10).await.unwrap();
        assert_eq!(history[0].description, "Money taken back from tournament: Cup");

        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits[0].action, AuditAction::MoneyTaken);
    }

    #[tokio::test]
    async fn clawback_fails_when_the_winnings_were_spent() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let (_, account, participation) = joined_participant(&db, dec!(0)).await;

        processor
            .send_prize(admin(), participation.id, dec!(200), Uuid::new_v4())
            .await
            .unwrap();
        // The player spends almost everything.
        let account = db.get_account(account.id).await.unwrap().unwrap();
        db.apply_delta(
            account.id,
            &BalanceDelta::real(dec!(-280)),
            account.version,
        )
        .await
        .unwrap();

        let err = processor
            .clawback_prize(admin(), participation.id, dec!(100), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");

        // The prize record is untouched by the failed debit.
        let participation = db.get_participation_by_id(participation.id).await.unwrap().unwrap();
        assert_eq!(participation.prize_won, dec!(200));
    }

    #[tokio::test]
    async fn tournament_create_derives_room_reveal_and_is_audited() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());

        let mut spec = spec("Grand Final", dec!(50), 16);
        spec.room_id = Some("12345".to_owned());
        spec.room_password = Some("secret".to_owned());
        let tournament = processor.create_tournament(admin(), &spec).await.unwrap();

        assert_eq!(
            tournament.room_visible_at,
            Some(spec.start_time - ChronoDuration::minutes(5))
        );

        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits[0].action, AuditAction::TournamentCreate);
    }

    #[tokio::test]
    async fn tournament_validation_rejects_bad_specs() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());

        let blank = spec("   ", dec!(10), 8);
        assert_eq!(
            processor.create_tournament(admin(), &blank).await.unwrap_err().code(),
            "INVALID_NAME"
        );

        let no_seats = spec("Cup", dec!(10), 0);
        assert_eq!(
            processor.create_tournament(admin(), &no_seats).await.unwrap_err().code(),
            "INVALID_CAPACITY"
        );

        let negative_fee = spec("Cup", dec!(-1), 8);
        assert_eq!(
            processor.create_tournament(admin(), &negative_fee).await.unwrap_err().code(),
            "INVALID_AMOUNT"
        );
    }

    #[tokio::test]
    async fn edit_cannot_shrink_capacity_below_occupancy() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let (tournament, _, _) = joined_participant(&db, dec!(0)).await;

        let smaller = spec("Cup", dec!(0), 0);
        let err = processor
            .edit_tournament(admin(), tournament.id, &smaller)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CAPACITY");

        let mut renamed = spec("Renamed Cup", dec!(0), 8);
        renamed.status = TournamentStatus::Live;
        let updated = processor
            .edit_tournament(admin(), tournament.id, &renamed)
            .await
            .unwrap();
        assert_eq!(updated.name, "Renamed Cup");
        assert_eq!(updated.participants_count, 1);
    }

    #[tokio::test]
    async fn delete_removes_the_tournament_and_its_participations() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let (tournament, account, _) = joined_participant(&db, dec!(0)).await;

        processor.delete_tournament(admin(), tournament.id).await.unwrap();

        assert!(db.get_tournament(tournament.id).await.unwrap().is_none());
        assert!(db
            .get_participation(tournament.id, account.id)
            .await
            .unwrap()
            .is_none());

        let audits = db.query_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(audits[0].action, AuditAction::TournamentDelete);
    }

    #[tokio::test]
    async fn audit_log_filters_by_action() {
        let db = MemoryStore::new();
        let processor = AdminProcessor::new(db.clone());
        let account = db.create_account("player").await.unwrap();

        processor
            .adjust_balance(admin(), &reward(account.id, BalanceDelta::real(dec!(5))))
            .await
            .unwrap();
        processor
            .set_account_status(admin(), account.id, AccountStatus::Suspended)
            .await
            .unwrap();

        let filter = AuditFilter {
            action: Some(AuditAction::RewardGiven),
            ..Default::default()
        };
        let entries = db.query_audit(&filter).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::RewardGiven);

        let all = processor.list_audit_log(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
