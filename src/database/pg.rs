use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    models::*, AccountStore, AuditStore, ParticipationStore, PgStore, TournamentStore,
    TransactionStore,
};
use crate::error::LedgerError;

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Applies a balance delta on an already-acquired connection so the same
/// conditional update can run standalone or inside a join transaction.
///
/// The update carries every guard in its WHERE clause: the version check and
/// the non-negativity of each resulting balance. No row updated means the
/// guard failed, and a follow-up read classifies which one.
async fn apply_delta_on(
    conn: &mut sqlx::PgConnection,
    id: Uuid,
    delta: &BalanceDelta,
    expected_version: i32,
) -> Result<Account, LedgerError> {
    let updated = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts
        SET wallet_real = wallet_real + $2,
            wallet_gems = wallet_gems + $3,
            wallet_coins = wallet_coins + $4,
            wallet_vouchers_20 = wallet_vouchers_20 + $5,
            wallet_vouchers_30 = wallet_vouchers_30 + $6,
            wallet_vouchers_50 = wallet_vouchers_50 + $7,
            version = version + 1
        WHERE id = $1
            AND version = $8
            AND wallet_real + $2 >= 0
            AND wallet_gems + $3 >= 0
            AND wallet_coins + $4 >= 0
            AND wallet_vouchers_20 + $5 >= 0
            AND wallet_vouchers_30 + $6 >= 0
            AND wallet_vouchers_50 + $7 >= 0
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(delta.real)
    .bind(delta.gems)
    .bind(delta.coins)
    .bind(delta.vouchers_20)
    .bind(delta.vouchers_30)
    .bind(delta.vouchers_50)
    .bind(expected_version)
    .fetch_optional(&mut *conn)
    .await?;

    match updated {
        Some(account) => Ok(account),
        None => {
            let current = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
            Err(match current {
                None => LedgerError::AccountNotFound(id),
                Some(a) if a.version != expected_version => LedgerError::VersionConflict,
                Some(_) => LedgerError::InsufficientFunds,
            })
        }
    }
}

async fn append_transaction_on(
    conn: &mut sqlx::PgConnection,
    tx: &NewTransaction,
) -> Result<Transaction, LedgerError> {
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions
            (account_id, amount, currency, kind, description, tournament_id, request_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(tx.account_id)
    .bind(tx.amount)
    .bind(tx.currency)
    .bind(tx.kind)
    .bind(&tx.description)
    .bind(tx.tournament_id)
    .bind(tx.request_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        // A duplicate idempotency key means the mutation already committed;
        // surfacing a conflict lets the caller re-read and resolve it.
        if is_unique_violation(&e) {
            LedgerError::VersionConflict
        } else {
            e.into()
        }
    })
}

impl AccountStore for PgStore {
    type Error = LedgerError;

    async fn create_account(&self, username: &str) -> Result<Account, Self::Error> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, username)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(account)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, Self::Error> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT * FROM accounts WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn apply_delta(
        &self,
        id: Uuid,
        delta: &BalanceDelta,
        expected_version: i32,
    ) -> Result<Account, Self::Error> {
        let mut conn = self.pool.acquire().await?;
        apply_delta_on(&mut conn, id, delta, expected_version).await
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        expected: AccountStatus,
    ) -> Result<Account, Self::Error> {
        let updated = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET status = $2, version = version + 1
            WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(account) => Ok(account),
            None => match self.get_account(id).await? {
                None => Err(LedgerError::AccountNotFound(id)),
                Some(_) => Err(LedgerError::VersionConflict),
            },
        }
    }
}

impl TournamentStore for PgStore {
    type Error = LedgerError;

    async fn get_tournament(&self, id: Uuid) -> Result<Option<Tournament>, Self::Error> {
        let tournament = sqlx::query_as::<_, Tournament>(
            r#"
            SELECT * FROM tournaments WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tournament)
    }

    async fn list_tournaments(&self) -> Result<Vec<Tournament>, Self::Error> {
        let tournaments = sqlx::query_as::<_, Tournament>(
            r#"
            SELECT * FROM tournaments
            ORDER BY start_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tournaments)
    }

    async fn insert_tournament(&self, spec: &TournamentSpec) -> Result<Tournament, Self::Error> {
        let tournament = sqlx::query_as::<_, Tournament>(
            r#"
            INSERT INTO tournaments
                (id, name, game, description, rules, entry_fee, prize_pool,
                 max_participants, status, start_time, room_id, room_password, room_visible_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&spec.name)
        .bind(&spec.game)
        .bind(&spec.description)
        .bind(&spec.rules)
        .bind(spec.entry_fee)
        .bind(spec.prize_pool)
        .bind(spec.max_participants)
        .bind(spec.status)
        .bind(spec.start_time)
        .bind(&spec.room_id)
        .bind(&spec.room_password)
        .bind(spec.room_visible_at())
        .fetch_one(&self.pool)
        .await?;
        Ok(tournament)
    }

    async fn update_tournament(
        &self,
        id: Uuid,
        spec: &TournamentSpec,
    ) -> Result<Tournament, Self::Error> {
        let updated = sqlx::query_as::<_, Tournament>(
            r#"
            UPDATE tournaments
            SET name = $2,
                game = $3,
                description = $4,
                rules = $5,
                entry_fee = $6,
                prize_pool = $7,
                max_participants = $8,
                status = $9,
                start_time = $10,
                room_id = $11,
                room_password = $12,
                room_visible_at = $13
            WHERE id = $1 AND participants_count <= $8
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&spec.name)
        .bind(&spec.game)
        .bind(&spec.description)
        .bind(&spec.rules)
        .bind(spec.entry_fee)
        .bind(spec.prize_pool)
        .bind(spec.max_participants)
        .bind(spec.status)
        .bind(spec.start_time)
        .bind(&spec.room_id)
        .bind(&spec.room_password)
        .bind(spec.room_visible_at())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(tournament) => Ok(tournament),
            None => match self.get_tournament(id).await? {
                None => Err(LedgerError::TournamentNotFound(id)),
                Some(_) => Err(LedgerError::InvalidCapacity),
            },
        }
    }

    async fn delete_tournament(&self, id: Uuid) -> Result<(), Self::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM tournaments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::TournamentNotFound(id));
        }
        Ok(())
    }
}

impl ParticipationStore for PgStore {
    type Error = LedgerError;

    async fn commit_join(&self, commit: &JoinCommit) -> Result<Participation, Self::Error> {
        let mut tx = self.pool.begin().await?;

        // Seat reservation: occupancy check, capacity check, and increment
        // as one statement. The returned occupancy is the assigned seat.
        let seat = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE tournaments
            SET participants_count = participants_count + 1
            WHERE id = $1
                AND status = 'upcoming'
                AND participants_count = $2
                AND participants_count < max_participants
            RETURNING participants_count
            "#,
        )
        .bind(commit.tournament_id)
        .bind(commit.expected_occupancy)
        .fetch_optional(&mut *tx)
        .await?;

        let seat = match seat {
            Some(seat) => seat,
            None => {
                let current =
                    sqlx::query_as::<_, Tournament>("SELECT * FROM tournaments WHERE id = $1")
                        .bind(commit.tournament_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match current {
                    None => LedgerError::TournamentNotFound(commit.tournament_id),
                    Some(t) if !t.is_open() => LedgerError::TournamentClosed,
                    Some(t)
                        if t.participants_count == commit.expected_occupancy
                            && t.participants_count >= t.max_participants =>
                    {
                        LedgerError::TournamentFull
                    }
                    Some(_) => LedgerError::VersionConflict,
                });
            }
        };

        if !commit.delta.is_empty() {
            apply_delta_on(
                &mut tx,
                commit.account_id,
                &commit.delta,
                commit.expected_version,
            )
            .await?;
        }

        let participation = sqlx::query_as::<_, Participation>(
            r#"
            INSERT INTO participations
                (id, tournament_id, account_id, in_game_name, seat_number,
                 fee_paid, voucher_used, payment_verified, request_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(commit.tournament_id)
        .bind(commit.account_id)
        .bind(&commit.in_game_name)
        .bind(seat)
        .bind(commit.fee_paid)
        .bind(commit.voucher_used)
        .bind(commit.request_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::AlreadyJoined
            } else {
                LedgerError::from(e)
            }
        })?;

        if let Some(entry) = &commit.transaction {
            append_transaction_on(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(participation)
    }

    async fn get_participation(
        &self,
        tournament_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<Participation>, Self::Error> {
        let participation = sqlx::query_as::<_, Participation>(
            r#"
            SELECT * FROM participations
            WHERE tournament_id = $1 AND account_id = $2
            LIMIT 1
            "#,
        )
        .bind(tournament_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(participation)
    }

    async fn get_participation_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<Participation>, Self::Error> {
        let participation = sqlx::query_as::<_, Participation>(
            r#"
            SELECT * FROM participations
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(participation)
    }

    async fn list_participants(
        &self,
        tournament_id: Uuid,
    ) -> Result<Vec<Participation>, Self::Error> {
        let participants = sqlx::query_as::<_, Participation>(
            r#"
            SELECT * FROM participations
            WHERE tournament_id = $1
            ORDER BY seat_number ASC
            "#,
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(participants)
    }

    async fn adjust_prize(
        &self,
        id: Uuid,
        amount: Decimal,
        mark_win_tag: bool,
    ) -> Result<Participation, Self::Error> {
        let updated = sqlx::query_as::<_, Participation>(
            r#"
            UPDATE participations
            SET prize_won = prize_won + $2,
                win_tag_given = win_tag_given OR $3
            WHERE id = $1 AND prize_won + $2 >= 0
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(amount)
        .bind(mark_win_tag)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(participation) => Ok(participation),
            None => match self.get_participation_by_id(id).await? {
                None => Err(LedgerError::ParticipationNotFound(id)),
                Some(_) => Err(LedgerError::InvalidAmount),
            },
        }
    }
}

impl TransactionStore for PgStore {
    type Error = LedgerError;

    async fn append_transaction(&self, tx: &NewTransaction) -> Result<Transaction, Self::Error> {
        let mut conn = self.pool.acquire().await?;
        append_transaction_on(&mut conn, tx).await
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, Self::Error> {
        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(transactions)
    }

    async fn find_by_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Transaction>, Self::Error> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE request_id = $1
            LIMIT 1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(transaction)
    }

    async fn void_request(&self, request_id: Uuid) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET request_id = NULL
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl AuditStore for PgStore {
    type Error = LedgerError;

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64, Self::Error> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO audit_log (admin_id, action, details)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(entry.admin_id)
        .bind(entry.action)
        .bind(&entry.details)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn query_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, Self::Error> {
        let entries = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT * FROM audit_log
            WHERE ($1::audit_action IS NULL OR action = $1)
                AND ($2::uuid IS NULL OR admin_id = $2)
                AND ($3::timestamptz IS NULL OR created_at >= $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(filter.action)
        .bind(filter.admin_id)
        .bind(filter.since)
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
