use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// How long before a tournament's start time its room credentials become
/// visible to verified participants.
pub const ROOM_REVEAL_LEAD_MINUTES: i64 = 5;

/// The standing of a user account. Accounts are never deleted; misbehaving
/// users are suspended or banned instead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, Default,
)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    #[strum(to_string = "Active")]
    Active,
    #[strum(to_string = "Suspended")]
    Suspended,
    #[strum(to_string = "Banned")]
    Banned,
}

/// A user's spendable holdings within the database.
///
/// The `version` column is the optimistic lock token: every committed
/// mutation increments it, and conditional updates check it so concurrent
/// writers cannot interleave lost updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub wallet_real: Decimal,
    pub wallet_gems: i32,
    pub wallet_coins: i32,
    pub wallet_vouchers_20: i32,
    pub wallet_vouchers_30: i32,
    pub wallet_vouchers_50: i32,
    pub status: AccountStatus,
    pub version: i32,
}

impl Account {
    pub fn voucher_count(&self, denomination: VoucherDenomination) -> i32 {
        match denomination {
            VoucherDenomination::Twenty => self.wallet_vouchers_20,
            VoucherDenomination::Thirty => self.wallet_vouchers_30,
            VoucherDenomination::Fifty => self.wallet_vouchers_50,
        }
    }

    /// The balance of a single currency, surfaced as a decimal so that cash
    /// and integer holdings can be reported uniformly.
    pub fn balance(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Real => self.wallet_real,
            Currency::Gems => Decimal::from(self.wallet_gems),
            Currency::Coins => Decimal::from(self.wallet_coins),
            Currency::Voucher20 => Decimal::from(self.wallet_vouchers_20),
            Currency::Voucher30 => Decimal::from(self.wallet_vouchers_30),
            Currency::Voucher50 => Decimal::from(self.wallet_vouchers_50),
        }
    }
}

/// The currencies an account can hold. Vouchers are fixed-denomination,
/// single-use credits tracked per denomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display)]
#[sqlx(type_name = "currency", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    #[strum(to_string = "real")]
    Real,
    #[strum(to_string = "gems")]
    Gems,
    #[strum(to_string = "coins")]
    Coins,
    #[sqlx(rename = "voucher_20")]
    #[serde(rename = "voucher_20")]
    #[strum(to_string = "voucher_20")]
    Voucher20,
    #[sqlx(rename = "voucher_30")]
    #[serde(rename = "voucher_30")]
    #[strum(to_string = "voucher_30")]
    Voucher30,
    #[sqlx(rename = "voucher_50")]
    #[serde(rename = "voucher_50")]
    #[strum(to_string = "voucher_50")]
    Voucher50,
}

/// The three voucher denominations offered by the platform. Stored as the
/// face value so the database column stays a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[repr(i32)]
pub enum VoucherDenomination {
    Twenty = 20,
    Thirty = 30,
    Fifty = 50,
}

impl VoucherDenomination {
    pub fn value(self) -> i32 {
        self as i32
    }

    /// The entry fee this voucher fully offsets. Redemption is exact-match
    /// only; a voucher never covers a partial fee.
    pub fn fee(self) -> Decimal {
        Decimal::from(self.value())
    }

    pub fn currency(self) -> Currency {
        match self {
            VoucherDenomination::Twenty => Currency::Voucher20,
            VoucherDenomination::Thirty => Currency::Voucher30,
            VoucherDenomination::Fifty => Currency::Voucher50,
        }
    }
}

/// A signed change across one or more currencies, applied to an account as a
/// single atomic unit. All fields default to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub real: Decimal,
    pub gems: i32,
    pub coins: i32,
    pub vouchers_20: i32,
    pub vouchers_30: i32,
    pub vouchers_50: i32,
}

impl BalanceDelta {
    pub fn real(amount: Decimal) -> Self {
        BalanceDelta {
            real: amount,
            ..Default::default()
        }
    }

    pub fn voucher(denomination: VoucherDenomination, count: i32) -> Self {
        let mut delta = BalanceDelta::default();
        match denomination {
            VoucherDenomination::Twenty => delta.vouchers_20 = count,
            VoucherDenomination::Thirty => delta.vouchers_30 = count,
            VoucherDenomination::Fifty => delta.vouchers_50 = count,
        }
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_zero()
            && self.gems == 0
            && self.coins == 0
            && self.vouchers_20 == 0
            && self.vouchers_30 == 0
            && self.vouchers_50 == 0
    }

    /// The non-zero entries of this delta, one per affected currency.
    pub fn entries(&self) -> Vec<(Currency, Decimal)> {
        let mut entries = Vec::new();
        if !self.real.is_zero() {
            entries.push((Currency::Real, self.real));
        }
        if self.gems != 0 {
            entries.push((Currency::Gems, Decimal::from(self.gems)));
        }
        if self.coins != 0 {
            entries.push((Currency::Coins, Decimal::from(self.coins)));
        }
        if self.vouchers_20 != 0 {
            entries.push((Currency::Voucher20, Decimal::from(self.vouchers_20)));
        }
        if self.vouchers_30 != 0 {
            entries.push((Currency::Voucher30, Decimal::from(self.vouchers_30)));
        }
        if self.vouchers_50 != 0 {
            entries.push((Currency::Voucher50, Decimal::from(self.vouchers_50)));
        }
        entries
    }

    /// The exact inverse of this delta, used by compensating rollbacks.
    pub fn negated(&self) -> Self {
        BalanceDelta {
            real: -self.real,
            gems: -self.gems,
            coins: -self.coins,
            vouchers_20: -self.vouchers_20,
            vouchers_30: -self.vouchers_30,
            vouchers_50: -self.vouchers_50,
        }
    }
}

/// The status of a tournament. Only `upcoming` tournaments accept joins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, Default,
)]
#[sqlx(type_name = "tournament_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    #[default]
    #[strum(to_string = "Upcoming")]
    Upcoming,
    #[strum(to_string = "Live")]
    Live,
    #[strum(to_string = "Completed")]
    Completed,
    #[strum(to_string = "Cancelled")]
    Cancelled,
}

/// A tournament within the database.
///
/// `participants_count` is the current occupancy. It is only ever moved by
/// the occupancy-conditional update inside a join commit, which is what keeps
/// it consistent with the participation rows under concurrency.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tournament {
    pub id: Uuid,
    pub name: String,
    pub game: String,
    pub description: Option<String>,
    pub rules: Option<String>,
    pub entry_fee: Decimal,
    pub prize_pool: Decimal,
    pub max_participants: i32,
    pub participants_count: i32,
    pub status: TournamentStatus,
    pub start_time: DateTime<Utc>,
    pub room_id: Option<String>,
    pub room_password: Option<String>,
    pub room_visible_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Tournament {
    pub fn seats_left(&self) -> i32 {
        self.max_participants - self.participants_count
    }

    pub fn is_open(&self) -> bool {
        self.status == TournamentStatus::Upcoming
    }

    /// Whether room credentials may be shown at the given instant.
    pub fn room_revealed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.room_visible_at, Some(at) if now >= at)
    }
}

/// The admin-supplied shape of a tournament, used for both create and edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentSpec {
    pub name: String,
    pub game: String,
    pub description: Option<String>,
    pub rules: Option<String>,
    pub entry_fee: Decimal,
    pub prize_pool: Decimal,
    pub max_participants: i32,
    pub status: TournamentStatus,
    pub start_time: DateTime<Utc>,
    pub room_id: Option<String>,
    pub room_password: Option<String>,
}

impl TournamentSpec {
    /// Room credentials become visible a fixed lead window before start.
    pub fn room_visible_at(&self) -> DateTime<Utc> {
        self.start_time - Duration::minutes(ROOM_REVEAL_LEAD_MINUTES)
    }
}

/// The binding of one account to one seat in one tournament.
///
/// Seat numbers are dense and unique within a tournament, starting at 1.
/// `fee_paid` is the amount actually charged, which is zero when a voucher
/// was redeemed. `prize_won` accumulates prize payouts and claw-backs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participation {
    pub id: Uuid,
    pub tournament_id: Uuid,
    pub account_id: Uuid,
    pub in_game_name: String,
    pub seat_number: i32,
    pub fee_paid: Decimal,
    pub voucher_used: Option<VoucherDenomination>,
    pub prize_won: Decimal,
    pub payment_verified: bool,
    pub win_tag_given: bool,
    pub request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Everything a store needs to commit one join atomically: the seat
/// reservation against the expected occupancy, the fee debit against the
/// expected account version, the participation row, and its ledger entry.
/// Either all of it commits or none of it does.
#[derive(Debug, Clone)]
pub struct JoinCommit {
    pub tournament_id: Uuid,
    pub account_id: Uuid,
    pub expected_occupancy: i32,
    pub expected_version: i32,
    pub in_game_name: String,
    pub fee_paid: Decimal,
    pub voucher_used: Option<VoucherDenomination>,
    pub delta: BalanceDelta,
    pub transaction: Option<NewTransaction>,
    pub request_id: Uuid,
}

/// The type of a balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display)]
#[sqlx(type_name = "transaction_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    #[strum(to_string = "tournament_entry")]
    TournamentEntry,
    #[strum(to_string = "tournament_win")]
    TournamentWin,
    #[strum(to_string = "admin_credit")]
    AdminCredit,
    #[strum(to_string = "admin_debit")]
    AdminDebit,
}

/// An immutable record of a balance-affecting event. Never mutated or
/// deleted after creation; an account's transactions in a currency reconcile
/// with its current balance in that currency.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub kind: TransactionKind,
    pub description: String,
    pub tournament_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A transaction that has not been appended yet.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub kind: TransactionKind,
    pub description: String,
    pub tournament_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
}

/// The action tags recorded in the audit log, one per privileged admin
/// mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    #[strum(to_string = "tournament_create")]
    TournamentCreate,
    #[strum(to_string = "tournament_edit")]
    TournamentEdit,
    #[strum(to_string = "tournament_delete")]
    TournamentDelete,
    #[strum(to_string = "user_ban")]
    UserBan,
    #[strum(to_string = "user_suspend")]
    UserSuspend,
    #[strum(to_string = "user_activate")]
    UserActivate,
    #[strum(to_string = "user_currency_edit")]
    UserCurrencyEdit,
    #[strum(to_string = "reward_given")]
    RewardGiven,
    #[strum(to_string = "money_sent")]
    MoneySent,
    #[strum(to_string = "money_taken")]
    MoneyTaken,
}

/// An immutable record of a privileged administrative action. The admin
/// reference is nullable because admin accounts can be removed later while
/// their history must remain.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: i64,
    pub admin_id: Option<Uuid>,
    pub action: AuditAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An audit entry that has not been appended yet.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub admin_id: Uuid,
    pub action: AuditAction,
    pub details: serde_json::Value,
}

/// Filters for reading the audit log, newest entries first.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub admin_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of entries to return. Zero means the default of 100.
    pub limit: i64,
}

impl AuditFilter {
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            100
        } else {
            self.limit
        }
    }
}

/// The room credentials revealed to verified participants shortly before a
/// tournament starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCredentials {
    pub room_id: String,
    pub room_password: String,
}
