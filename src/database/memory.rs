//! An in-memory store with the same commit semantics as the Postgres
//! backend, kept behind the same traits so processor logic can be tested
//! without a running database.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    models::*, AccountStore, AuditStore, ParticipationStore, TournamentStore, TransactionStore,
};
use crate::error::LedgerError;

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    tournaments: HashMap<Uuid, Tournament>,
    participations: HashMap<Uuid, Participation>,
    transactions: Vec<Transaction>,
    audit_log: Vec<AuditLogEntry>,
    next_transaction_id: i64,
    next_audit_id: i64,
    fail_next_audit: bool,
}

impl Inner {
    /// Runs the same guards as the Postgres conditional update, then applies
    /// the delta. Returns without mutating anything when a guard fails.
    fn apply_delta(
        &mut self,
        id: Uuid,
        delta: &BalanceDelta,
        expected_version: i32,
    ) -> Result<Account, LedgerError> {
        let account = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        if account.version != expected_version {
            return Err(LedgerError::VersionConflict);
        }
        if account.wallet_real + delta.real < Decimal::ZERO
            || account.wallet_gems + delta.gems < 0
            || account.wallet_coins + delta.coins < 0
            || account.wallet_vouchers_20 + delta.vouchers_20 < 0
            || account.wallet_vouchers_30 + delta.vouchers_30 < 0
            || account.wallet_vouchers_50 + delta.vouchers_50 < 0
        {
            return Err(LedgerError::InsufficientFunds);
        }
        account.wallet_real += delta.real;
        account.wallet_gems += delta.gems;
        account.wallet_coins += delta.coins;
        account.wallet_vouchers_20 += delta.vouchers_20;
        account.wallet_vouchers_30 += delta.vouchers_30;
        account.wallet_vouchers_50 += delta.vouchers_50;
        account.version += 1;
        Ok(account.clone())
    }

    fn append_transaction(&mut self, tx: &NewTransaction) -> Result<Transaction, LedgerError> {
        if let Some(request_id) = tx.request_id {
            if self
                .transactions
                .iter()
                .any(|t| t.request_id == Some(request_id))
            {
                return Err(LedgerError::VersionConflict);
            }
        }
        let record = Transaction {
            id: self.next_transaction_id,
            account_id: tx.account_id,
            amount: tx.amount,
            currency: tx.currency,
            kind: tx.kind,
            description: tx.description.clone(),
            tournament_id: tx.tournament_id,
            request_id: tx.request_id,
            created_at: Utc::now(),
        };
        self.next_transaction_id += 1;
        self.transactions.push(record.clone());
        Ok(record)
    }
}

/// A shared, clonable in-memory store. All mutations run under one lock, so
/// each store operation is atomic exactly like its Postgres counterpart.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(Inner {
                next_transaction_id: 1,
                next_audit_id: 1,
                ..Default::default()
            })),
        }
    }

    /// Makes the next audit append fail, to exercise compensation paths.
    #[cfg(test)]
    pub(crate) async fn fail_next_audit(&self) {
        self.inner.lock().await.fail_next_audit = true;
    }
}

impl AccountStore for MemoryStore {
    type Error = LedgerError;

    async fn create_account(&self, username: &str) -> Result<Account, Self::Error> {
        let mut inner = self.inner.lock().await;
        let account = Account {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            ..Default::default()
        };
        inner.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, Self::Error> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(&id).cloned())
    }

    async fn apply_delta(
        &self,
        id: Uuid,
        delta: &BalanceDelta,
        expected_version: i32,
    ) -> Result<Account, Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.apply_delta(id, delta, expected_version)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        expected: AccountStatus,
    ) -> Result<Account, Self::Error> {
        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        if account.status != expected {
            return Err(LedgerError::VersionConflict);
        }
        account.status = status;
        account.version += 1;
        Ok(account.clone())
    }
}

impl TournamentStore for MemoryStore {
    type Error = LedgerError;

    async fn get_tournament(&self, id: Uuid) -> Result<Option<Tournament>, Self::Error> {
        let inner = self.inner.lock().await;
        Ok(inner.tournaments.get(&id).cloned())
    }

    async fn list_tournaments(&self) -> Result<Vec<Tournament>, Self::Error> {
        let inner = self.inner.lock().await;
        let mut tournaments: Vec<Tournament> = inner.tournaments.values().cloned().collect();
        tournaments.sort_by_key(|t| t.start_time);
        Ok(tournaments)
    }

    async fn insert_tournament(&self, spec: &TournamentSpec) -> Result<Tournament, Self::Error> {
        let mut inner = self.inner.lock().await;
        let tournament = Tournament {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            game: spec.game.clone(),
            description: spec.description.clone(),
            rules: spec.rules.clone(),
            entry_fee: spec.entry_fee,
            prize_pool: spec.prize_pool,
            max_participants: spec.max_participants,
            participants_count: 0,
            status: spec.status,
            start_time: spec.start_time,
            room_id: spec.room_id.clone(),
            room_password: spec.room_password.clone(),
            room_visible_at: Some(spec.room_visible_at()),
            created_at: Utc::now(),
        };
        inner.tournaments.insert(tournament.id, tournament.clone());
        Ok(tournament)
    }

    async fn update_tournament(
        &self,
        id: Uuid,
        spec: &TournamentSpec,
    ) -> Result<Tournament, Self::Error> {
        let mut inner = self.inner.lock().await;
        let tournament = inner
            .tournaments
            .get_mut(&id)
            .ok_or(LedgerError::TournamentNotFound(id))?;
        if tournament.participants_count > spec.max_participants {
            return Err(LedgerError::InvalidCapacity);
        }
        tournament.name = spec.name.clone();
        tournament.game = spec.game.clone();
        tournament.description = spec.description.clone();
        tournament.rules = spec.rules.clone();
        tournament.entry_fee = spec.entry_fee;
        tournament.prize_pool = spec.prize_pool;
        tournament.max_participants = spec.max_participants;
        tournament.status = spec.status;
        tournament.start_time = spec.start_time;
        tournament.room_id = spec.room_id.clone();
        tournament.room_password = spec.room_password.clone();
        tournament.room_visible_at = Some(spec.room_visible_at());
        Ok(tournament.clone())
    }

    async fn delete_tournament(&self, id: Uuid) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        if inner.tournaments.remove(&id).is_none() {
            return Err(LedgerError::TournamentNotFound(id));
        }
        inner.participations.retain(|_, p| p.tournament_id != id);
        Ok(())
    }
}

impl ParticipationStore for MemoryStore {
    type Error = LedgerError;

    async fn commit_join(&self, commit: &JoinCommit) -> Result<Participation, Self::Error> {
        let mut inner = self.inner.lock().await;

        // Validate every guard before touching any state, so a failed commit
        // leaves nothing behind, same as a rolled-back transaction.
        let tournament = inner
            .tournaments
            .get(&commit.tournament_id)
            .ok_or(LedgerError::TournamentNotFound(commit.tournament_id))?;
        if !tournament.is_open() {
            return Err(LedgerError::TournamentClosed);
        }
        if tournament.participants_count != commit.expected_occupancy {
            return Err(LedgerError::VersionConflict);
        }
        if tournament.participants_count >= tournament.max_participants {
            return Err(LedgerError::TournamentFull);
        }
        if !commit.delta.is_empty() {
            let account = inner
                .accounts
                .get(&commit.account_id)
                .ok_or(LedgerError::AccountNotFound(commit.account_id))?;
            if account.version != commit.expected_version {
                return Err(LedgerError::VersionConflict);
            }
        }
        if inner.participations.values().any(|p| {
            p.tournament_id == commit.tournament_id && p.account_id == commit.account_id
        }) {
            return Err(LedgerError::AlreadyJoined);
        }
        if let Some(entry) = &commit.transaction {
            if let Some(request_id) = entry.request_id {
                if inner
                    .transactions
                    .iter()
                    .any(|t| t.request_id == Some(request_id))
                {
                    return Err(LedgerError::VersionConflict);
                }
            }
        }

        if !commit.delta.is_empty() {
            inner.apply_delta(commit.account_id, &commit.delta, commit.expected_version)?;
        }
        let tournament = inner
            .tournaments
            .get_mut(&commit.tournament_id)
            .ok_or(LedgerError::TournamentNotFound(commit.tournament_id))?;
        tournament.participants_count += 1;
        let seat = tournament.participants_count;

        let participation = Participation {
            id: Uuid::new_v4(),
            tournament_id: commit.tournament_id,
            account_id: commit.account_id,
            in_game_name: commit.in_game_name.clone(),
            seat_number: seat,
            fee_paid: commit.fee_paid,
            voucher_used: commit.voucher_used,
            prize_won: Decimal::ZERO,
            payment_verified: true,
            win_tag_given: false,
            request_id: Some(commit.request_id),
            created_at: Utc::now(),
        };
        inner
            .participations
            .insert(participation.id, participation.clone());

        if let Some(entry) = &commit.transaction {
            inner.append_transaction(entry)?;
        }

        Ok(participation)
    }

    async fn get_participation(
        &self,
        tournament_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<Participation>, Self::Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .participations
            .values()
            .find(|p| p.tournament_id == tournament_id && p.account_id == account_id)
            .cloned())
    }

    async fn get_participation_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<Participation>, Self::Error> {
        let inner = self.inner.lock().await;
        Ok(inner.participations.get(&id).cloned())
    }

    async fn list_participants(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<Participation>, Self::Error> {
        let inner = self.inner.lock().await;
        let mut participants: Vec<Participation> = inner
            .participations
            .values()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.seat_number);
        Ok(participants)
    }

    async fn adjust_prize(
        &self,
        id: Uuid,
        amount: Decimal,
        mark_win_tag: bool,
    ) -> Result<Participation, Self::Error> {
        let mut inner = self.inner.lock().await;
        let participation = inner
            .participations
            .get_mut(&id)
            .ok_or(LedgerError::ParticipationNotFound(id))?;
        if participation.prize_won + amount < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        participation.prize_won += amount;
        participation.win_tag_given = participation.win_tag_given || mark_win_tag;
        Ok(participation.clone())
    }
}

impl TransactionStore for MemoryStore {
    type Error = LedgerError;

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<Transaction, Self::Error> {
        let mut inner = self.inner.lock().await;
        inner.append_transaction(tx)
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, Self::Error> {
        let inner = self.inner.lock().await;
        let mut transactions: Vec<Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        transactions.sort_by_key(|t| std::cmp::Reverse(t.id));
        transactions.truncate(limit.max(0) as usize);
        Ok(transactions)
    }

    async fn find_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Transaction>, Self::Error> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .iter()
            .find(|t| t.request_id == Some(request_id))
            .cloned())
    }

    async fn void_request(&self, request_id: Uuid) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock().await;
        for tx in inner
            .transactions
            .iter_mut()
            .filter(|t| t.request_id == Some(request_id))
        {
            tx.request_id = None;
        }
        Ok(())
    }
}

impl AuditStore for MemoryStore {
    type Error = LedgerError;

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64, Self::Error> {
        let mut inner = self.inner.lock().await;
        if inner.fail_next_audit {
            inner.fail_next_audit = false;
            return Err(LedgerError::Storage(anyhow!("audit store unavailable")));
        }
        let record = AuditLogEntry {
            id: inner.next_audit_id,
            admin_id: Some(entry.admin_id),
            action: entry.action,
            details: entry.details.clone(),
            created_at: Utc::now(),
        };
        inner.next_audit_id += 1;
        inner.audit_log.push(record.clone());
        Ok(record.id)
    }

    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, Self::Error> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<AuditLogEntry> = inner
            .audit_log
            .iter()
            .filter(|e| filter.action.map_or(true, |a| e.action == a))
            .filter(|e| filter.admin_id.map_or(true, |id| e.admin_id == Some(id)))
            .filter(|e| filter.since.map_or(true, |t| e.created_at >= t))
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.id));
        entries.truncate(filter.effective_limit() as usize);
        Ok(entries)
    }
}
