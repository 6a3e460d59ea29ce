//! The entry processor: tournament joins, wallet reads, and room-credential
//! reveals. All money movement goes through the store's atomic commit, so a
//! crash or a lost race never leaves a half-applied join behind.

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::database::models::{
    Account, AccountStatus, BalanceDelta, Currency, JoinCommit, NewTransaction, Participation,
    RoomCredentials, Tournament, Transaction, TransactionKind, VoucherDenomination,
};
use crate::database::LedgerStore;
use crate::error::{LedgerError, LedgerResult};

/// Minimum length of an in-game name after trimming.
pub const MIN_NAME_LEN: usize = 3;

/// How many times a commit is retried after losing an optimistic-concurrency
/// race before the conflict is surfaced to the caller.
const MAX_COMMIT_ATTEMPTS: u32 = 4;

/// Base delay before the first retry; doubles on each subsequent one.
const RETRY_BASE_DELAY_MS: u64 = 25;

/// Default number of history entries returned when the caller asks for none.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// One attempt by a user to enter a tournament. The `request_id` is the
/// client-supplied idempotency key: resubmitting the same request after an
/// unknown outcome returns the already-committed participation instead of
/// charging twice.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub tournament_id: Uuid,
    pub account_id: Uuid,
    pub in_game_name: String,
    pub voucher: Option<VoucherDenomination>,
    pub request_id: Uuid,
}

/// Processes user-facing wallet and tournament-entry operations on top of
/// any [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct EntryProcessor<DB> {
    db: DB,
}

impl<DB: LedgerStore> EntryProcessor<DB> {
    pub fn new(db: DB) -> Self {
        EntryProcessor { db }
    }

    /// Joins a tournament, charging the entry fee in cash or redeeming one
    /// voucher of exactly the fee's denomination.
    ///
    /// Lost races against concurrent joiners are retried internally a small
    /// number of times; a conflict that persists past the retry budget is
    /// returned as [`LedgerError::VersionConflict`] and the caller may simply
    /// resubmit with the same `request_id`.
    #[instrument(skip(self, request), fields(tournament = %request.tournament_id, account = %request.account_id))]
    pub async fn join_tournament(&self, request: &JoinRequest) -> LedgerResult<Participation> {
        let name = request.in_game_name.trim();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(LedgerError::InvalidName);
        }

        let mut attempt = 0;
        loop {
            match self.try_join(request, name).await {
                Err(e) if e.is_retryable() && attempt + 1 < MAX_COMMIT_ATTEMPTS => {
                    let delay = RETRY_BASE_DELAY_MS << attempt;
                    warn!(attempt, delay_ms = delay, "join lost a concurrent race, retrying");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Ok(participation) => {
                    info!(seat = participation.seat_number, "join committed");
                    return Ok(participation);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One full read-validate-commit pass. Re-reads everything fresh so that
    /// a retry after a version conflict sees the winner's state.
    async fn try_join(&self, request: &JoinRequest, name: &str) -> LedgerResult<Participation> {
        if let Some(existing) = self
            .db
            .get_participation(request.tournament_id, request.account_id)
            .await?
        {
            // Same request id means this is a replay of a commit that
            // already went through; anything else is a genuine double join.
            if existing.request_id == Some(request.request_id) {
                return Ok(existing);
            }
            return Err(LedgerError::AlreadyJoined);
        }

        let tournament = self
            .db
            .get_tournament(request.tournament_id)
            .await?
            .ok_or(LedgerError::TournamentNotFound(request.tournament_id))?;
        if !tournament.is_open() {
            return Err(LedgerError::TournamentClosed);
        }
        if tournament.seats_left() <= 0 {
            return Err(LedgerError::TournamentFull);
        }

        let account = self
            .db
            .get_account(request.account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(request.account_id))?;
        if account.status != AccountStatus::Active {
            return Err(LedgerError::AccountInactive);
        }

        let (fee_paid, delta, transaction) = match request.voucher {
            Some(denomination) => {
                if denomination.fee() != tournament.entry_fee {
                    return Err(LedgerError::VoucherMismatch);
                }
                if account.voucher_count(denomination) < 1 {
                    return Err(LedgerError::InsufficientFunds);
                }
                let entry = NewTransaction {
                    account_id: account.id,
                    amount: Decimal::NEGATIVE_ONE,
                    currency: denomination.currency(),
                    kind: TransactionKind::TournamentEntry,
                    description: format!("Joined tournament: {} (Voucher)", tournament.name),
                    tournament_id: Some(tournament.id),
                    request_id: Some(request.request_id),
                };
                (
                    Decimal::ZERO,
                    BalanceDelta::voucher(denomination, -1),
                    Some(entry),
                )
            }
            None if tournament.entry_fee.is_zero() => {
                // Free tournaments move no money and leave no ledger entry.
                (Decimal::ZERO, BalanceDelta::default(), None)
            }
            None => {
                if account.wallet_real < tournament.entry_fee {
                    return Err(LedgerError::InsufficientFunds);
                }
                let entry = NewTransaction {
                    account_id: account.id,
                    amount: -tournament.entry_fee,
                    currency: Currency::Real,
                    kind: TransactionKind::TournamentEntry,
                    description: format!("Joined tournament: {}", tournament.name),
                    tournament_id: Some(tournament.id),
                    request_id: Some(request.request_id),
                };
                (
                    tournament.entry_fee,
                    BalanceDelta::real(-tournament.entry_fee),
                    Some(entry),
                )
            }
        };

        let commit = JoinCommit {
            tournament_id: tournament.id,
            account_id: account.id,
            expected_occupancy: tournament.participants_count,
            expected_version: account.version,
            in_game_name: name.to_owned(),
            fee_paid,
            voucher_used: request.voucher,
            delta,
            transaction,
            request_id: request.request_id,
        };
        self.db.commit_join(&commit).await
    }

    /// The account's current balances and status.
    pub async fn account_snapshot(&self, account_id: Uuid) -> LedgerResult<Account> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// The account's wallet history, newest first. A non-positive limit
    /// falls back to [`DEFAULT_HISTORY_LIMIT`].
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> LedgerResult<Vec<Transaction>> {
        let limit = if limit <= 0 { DEFAULT_HISTORY_LIMIT } else { limit };
        self.db.list_transactions(account_id, limit).await
    }

    /// All tournaments, soonest start first.
    pub async fn list_tournaments(&self) -> LedgerResult<Vec<Tournament>> {
        self.db.list_tournaments().await
    }

    /// Room credentials for a tournament, revealed only to participants with
    /// a verified payment and only inside the reveal window before start.
    /// Returns `Ok(None)` while the caller is not entitled to see them.
    pub async fn room_credentials(
        &self,
        tournament_id: Uuid,
        account_id: Uuid,
    ) -> LedgerResult<Option<RoomCredentials>> {
        let tournament = self
            .db
            .get_tournament(tournament_id)
            .await?
            .ok_or(LedgerError::TournamentNotFound(tournament_id))?;

        let participation = match self.db.get_participation(tournament_id, account_id).await? {
            Some(p) => p,
            None => return Ok(None),
        };
        if !participation.payment_verified || !tournament.room_revealed(chrono::Utc::now()) {
            return Ok(None);
        }

        let credentials = tournament
            .room_id
            .zip(tournament.room_password)
            .map(|(room_id, room_password)| RoomCredentials {
                room_id,
                room_password,
            });
        Ok(credentials)
    }
}
