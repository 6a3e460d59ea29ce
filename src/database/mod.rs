use tracing::info;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use models::*;

/// In-memory store used by tests and embedders that run without Postgres.
pub mod memory;
/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;
/// Postgres implementations of the store traits.
mod pg;

/// The Postgres database used for the tournament wallet ledger.
///
/// Changing which store backs the ledger only requires another implementation
/// of the store traits below; the processors are generic over them.
#[derive(Debug, Clone)]
pub struct PgStore {
    pub pool: sqlx::PgPool,
}

impl PgStore {
    pub async fn connect() -> LedgerResult<Self> {
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        let db_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                return Err(LedgerError::Storage(anyhow::anyhow!(
                    "DATABASE_URL environment variable not found"
                )));
            }
        };
        let pool = sqlx::PgPool::connect(db_url.as_str()).await?;
        info!("Successfully connected to the database.");

        Ok(PgStore { pool })
    }

    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.into()))?;
        Ok(())
    }
}

/// Accounts and their balances.
///
/// `apply_delta` is the only way balances move: one conditional update that
/// either changes every requested currency and bumps the version, or changes
/// nothing. Callers that receive `VersionConflict` must re-read and retry;
/// there is no silent retry at this layer.
#[allow(async_fn_in_trait)]
pub trait AccountStore {
    type Error;

    /// Creates an account with zeroed balances. Registration itself lives
    /// outside the ledger; this exists for embedders and tests.
    async fn create_account(&self, username: &str) -> Result<Account, Self::Error>;

    /// Retrieves an account by id.
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, Self::Error>;

    /// Applies a signed multi-currency delta against the state at
    /// `expected_version`. Fails with `InsufficientFunds` if any resulting
    /// balance would go negative, and with `VersionConflict` if another
    /// writer committed first.
    async fn apply_delta(
        &self,
        id: Uuid,
        delta: &BalanceDelta,
        expected_version: i32,
    ) -> Result<Account, Self::Error>;

    /// Writes the account status, conditional on the status the caller read.
    /// Fails with `VersionConflict` when another writer changed it first, so
    /// a stale read can never commit a forbidden transition. Transition
    /// rules themselves are enforced by the admin processor, not here.
    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        expected: AccountStatus,
    ) -> Result<Account, Self::Error>;
}

/// Tournament definitions and occupancy.
#[allow(async_fn_in_trait)]
pub trait TournamentStore {
    type Error;

    /// Retrieves a tournament by id.
    async fn get_tournament(&self, id: Uuid) -> Result<Option<Tournament>, Self::Error>;

    /// Retrieves all tournaments, soonest start first.
    async fn list_tournaments(&self) -> Result<Vec<Tournament>, Self::Error>;

    /// Creates a tournament from an admin-supplied spec, deriving the
    /// room-reveal time from the start time.
    async fn insert_tournament(&self, spec: &TournamentSpec) -> Result<Tournament, Self::Error>;

    /// Replaces a tournament's definition. Rejects with `InvalidCapacity`
    /// if the new capacity is below the current occupancy; the check and
    /// the write are one atomic update.
    async fn update_tournament(
        &self,
        id: Uuid,
        spec: &TournamentSpec,
    ) -> Result<Tournament, Self::Error>;

    /// Deletes a tournament. Dependent participations go with it.
    async fn delete_tournament(&self, id: Uuid) -> Result<(), Self::Error>;
}

/// Participations, including the atomic join commit.
#[allow(async_fn_in_trait)]
pub trait ParticipationStore {
    type Error;

    /// Commits one join as a single atomic unit: seat reservation checked
    /// against the expected occupancy and an open tournament status, fee
    /// debit checked against the expected account version, participation
    /// insert, and the entry transaction. A failure in any step leaves no
    /// trace of the others.
    ///
    /// The assigned seat is always `expected_occupancy + 1`, which is what
    /// keeps seats dense and unique when the occupancy check serializes
    /// concurrent joins.
    async fn commit_join(&self, commit: &JoinCommit) -> Result<Participation, Self::Error>;

    /// Retrieves a participation by its tournament and account pair.
    async fn get_participation(
        &self,
        tournament_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<Participation>, Self::Error>;

    /// Retrieves a participation by id.
    async fn get_participation_by_id(&self, id: Uuid)
        -> Result<Option<Participation>, Self::Error>;

    /// Retrieves all participants of a tournament in seat order.
    async fn list_participants(&self, tournament_id: Uuid)
        -> Result<Vec<Participation>, Self::Error>;

    /// Moves the accumulated prize by a signed amount, atomically guarded so
    /// the result never goes negative. `mark_win_tag` flags the first
    /// successful payout.
    async fn adjust_prize(
        &self,
        id: Uuid,
        amount: rust_decimal::Decimal,
        mark_win_tag: bool,
    ) -> Result<Participation, Self::Error>;
}

/// The append-only transaction ledger.
#[allow(async_fn_in_trait)]
pub trait TransactionStore {
    type Error;

    /// Appends one transaction. Records are immutable once written.
    async fn append_transaction(&self, tx: &NewTransaction) -> Result<Transaction, Self::Error>;

    /// Retrieves an account's transactions, newest first.
    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, Self::Error>;

    /// Looks up a transaction by its client-supplied idempotency key. Used
    /// to resolve unknown-outcome retries without re-applying the mutation.
    async fn find_by_request(&self, request_id: Uuid)
        -> Result<Option<Transaction>, Self::Error>;

    /// Detaches an idempotency key from its transaction. Called when the
    /// operation that carried the key was rolled back through compensating
    /// writes: the monetary rows stay (the reversal is also on the ledger),
    /// but the key must stop marking the request as applied so a retry can
    /// go through. A no-op when the key is not present.
    async fn void_request(&self, request_id: Uuid) -> Result<(), Self::Error>;
}

/// The append-only audit log of privileged admin mutations.
#[allow(async_fn_in_trait)]
pub trait AuditStore {
    type Error;

    /// Appends one entry, returning its id. No business validation happens
    /// here; a failure is a fault, and the admin processor treats it as
    /// fatal to the whole operation.
    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64, Self::Error>;

    /// Retrieves entries matching the filter, newest first.
    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, Self::Error>;
}

/// Everything the processors need from a backing store.
pub trait LedgerStore:
    AccountStore<Error = LedgerError>
    + TournamentStore<Error = LedgerError>
    + ParticipationStore<Error = LedgerError>
    + TransactionStore<Error = LedgerError>
    + AuditStore<Error = LedgerError>
{
}

impl<T> LedgerStore for T where
    T: AccountStore<Error = LedgerError>
        + TournamentStore<Error = LedgerError>
        + ParticipationStore<Error = LedgerError>
        + TransactionStore<Error = LedgerError>
        + AuditStore<Error = LedgerError>
{
}
