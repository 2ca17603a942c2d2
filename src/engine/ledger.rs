//! Credit and reschedule-quota bookkeeping.
//!
//! Every function here is pure: it reads a snapshot of the account and
//! returns the events to commit alongside the booking they accompany.

use crate::model::*;

use super::SchedulingError;

/// Take `amount` credits of `kind`. Fails without events if the balance is short.
pub fn debit(
    account: &StudentAccount,
    kind: CreditKind,
    amount: u32,
) -> Result<Event, SchedulingError> {
    let balance = account.credits.get(kind);
    if balance < amount {
        return Err(SchedulingError::InsufficientCredit {
            kind,
            balance,
            needed: amount,
        });
    }
    Ok(Event::CreditAdjusted {
        student_id: account.student_id,
        kind,
        delta: -(amount as i64),
    })
}

pub fn credit(student_id: ulid::Ulid, kind: CreditKind, amount: u32) -> Event {
    Event::CreditAdjusted {
        student_id,
        kind,
        delta: amount as i64,
    }
}

pub fn can_reschedule(account: &StudentAccount, month: MonthKey, limit: Option<u32>) -> bool {
    limit.is_none_or(|l| account.reschedules_in(month) < l)
}

/// Count one non-credit reschedule against `month`.
///
/// `None` when the actor has no limit and nothing is counted.
pub fn count_reschedule(
    account: &StudentAccount,
    month: MonthKey,
    limit: Option<u32>,
) -> Result<Option<Event>, SchedulingError> {
    let Some(limit) = limit else {
        return Ok(None);
    };
    let used = account.reschedules_in(month);
    if used >= limit {
        return Err(SchedulingError::QuotaExceeded { used, limit, month });
    }
    Ok(Some(Event::RescheduleCounted {
        student_id: account.student_id,
        month,
        count: used + 1,
    }))
}

/// Apply a signed adjustment to a balance, saturating at zero.
pub(super) fn apply_delta(balance: &mut CreditBalance, kind: CreditKind, delta: i64) {
    let slot = balance.get_mut(kind);
    *slot = (*slot as i64 + delta).clamp(0, u32::MAX as i64) as u32;
}
