use uuid::Uuid;

use crate::database::models::AccountStatus;

/// Convenience alias used throughout the crate.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Every outcome a caller of the ledger can observe, as a closed set of
/// variants. UI and admin layers branch on [`LedgerError::code`] rather than
/// on error messages, so the codes are stable while the messages are not.
#[derive(Debug)]
pub enum LedgerError {
    /// The in-game name is missing or shorter than the policy minimum.
    InvalidName,
    /// The account already holds a seat in this tournament.
    AlreadyJoined,
    /// Every seat in the tournament is taken.
    TournamentFull,
    /// The tournament is not accepting joins in its current status.
    TournamentClosed,
    /// The mutation would drive a balance below zero.
    InsufficientFunds,
    /// The voucher denomination does not match the tournament's entry fee.
    VoucherMismatch,
    /// An admin adjustment would drive a balance below zero.
    NegativeBalance,
    /// The account is suspended or banned.
    AccountInactive,
    /// A zero, negative, or out-of-range amount was supplied.
    InvalidAmount,
    /// The requested account status transition is not permitted.
    InvalidStatusChange(AccountStatus, AccountStatus),
    /// The tournament capacity is not positive, or an edit would shrink it
    /// below the current occupancy.
    InvalidCapacity,
    AccountNotFound(Uuid),
    TournamentNotFound(Uuid),
    ParticipationNotFound(Uuid),
    /// Another writer committed first; re-read and retry.
    VersionConflict,
    /// The audit log rejected the append, so the whole admin mutation was
    /// rolled back.
    AuditFailed,
    /// A storage or transport fault underneath the ledger.
    Storage(anyhow::Error),
}

impl LedgerError {
    /// The stable error code surfaced across the external interface.
    pub fn code(&self) -> &'static str {
        use LedgerError::*;
        match self {
            InvalidName => "INVALID_NAME",
            AlreadyJoined => "ALREADY_JOINED",
            TournamentFull => "TOURNAMENT_FULL",
            TournamentClosed => "TOURNAMENT_CLOSED",
            InsufficientFunds => "INSUFFICIENT_FUNDS",
            VoucherMismatch => "VOUCHER_MISMATCH",
            NegativeBalance => "NEGATIVE_BALANCE",
            AccountInactive => "ACCOUNT_INACTIVE",
            InvalidAmount => "INVALID_AMOUNT",
            InvalidStatusChange(..) => "INVALID_STATUS_CHANGE",
            InvalidCapacity => "INVALID_CAPACITY",
            AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TournamentNotFound(_) => "TOURNAMENT_NOT_FOUND",
            ParticipationNotFound(_) => "PARTICIPATION_NOT_FOUND",
            VersionConflict => "VERSION_CONFLICT",
            AuditFailed => "AUDIT_FAILED",
            Storage(_) => "STORAGE",
        }
    }

    /// Whether the caller may safely retry after re-reading current state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::VersionConflict)
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use LedgerError::*;
        match self {
            InvalidName => write!(f, "In-game name must be at least 3 characters."),
            AlreadyJoined => write!(f, "Already joined this tournament."),
            TournamentFull => write!(f, "Tournament is full."),
            TournamentClosed => write!(f, "Tournament is not open for registration."),
            InsufficientFunds => write!(f, "Insufficient balance."),
            VoucherMismatch => write!(f, "Voucher does not match the entry fee."),
            NegativeBalance => write!(f, "Adjustment would make a balance negative."),
            AccountInactive => write!(f, "Account is suspended or banned."),
            InvalidAmount => write!(f, "Amount is not valid for this operation."),
            InvalidStatusChange(from, to) => {
                write!(f, "Cannot change account status from {} to {}.", from, to)
            }
            InvalidCapacity => write!(f, "Tournament capacity is not valid."),
            AccountNotFound(id) => write!(f, "Account {} does not exist.", id),
            TournamentNotFound(id) => write!(f, "Tournament {} does not exist.", id),
            ParticipationNotFound(id) => write!(f, "Participation {} does not exist.", id),
            VersionConflict => write!(f, "Concurrent update detected, please try again."),
            AuditFailed => write!(f, "Action failed, no changes were made."),
            Storage(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Storage(e) => e.source(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.into())
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(e: anyhow::Error) -> Self {
        LedgerError::Storage(e)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Storage(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::LedgerError;

    #[test]
    fn codes_are_stable() {
        assert_eq!(LedgerError::InvalidName.code(), "INVALID_NAME");
        assert_eq!(LedgerError::AlreadyJoined.code(), "ALREADY_JOINED");
        assert_eq!(LedgerError::TournamentFull.code(), "TOURNAMENT_FULL");
        assert_eq!(LedgerError::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(LedgerError::VoucherMismatch.code(), "VOUCHER_MISMATCH");
        assert_eq!(LedgerError::VersionConflict.code(), "VERSION_CONFLICT");
    }

    #[test]
    fn only_version_conflict_is_retryable() {
        assert!(LedgerError::VersionConflict.is_retryable());
        assert!(!LedgerError::TournamentFull.is_retryable());
        assert!(!LedgerError::AuditFailed.is_retryable());
    }
}
