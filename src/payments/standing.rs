/// Payment standing: are a user's payments keeping up with time registered?
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a user's payment counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub payment_count: i64,
    pub months_since_registration: i64,
    pub required_payments: i64,
    pub is_up_to_date: bool,
}

/// Whole calendar months elapsed between two instants (never negative)
pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    if to <= from {
        return 0;
    }

    let mut months = i64::from(to.year() - from.year()) * 12
        + i64::from(to.month()) - i64::from(from.month());

    // The last month only counts once its day-of-month and time are reached
    let to_in_month = (to.day(), to.num_seconds_from_midnight(), to.nanosecond());
    let from_in_month = (from.day(), from.num_seconds_from_midnight(), from.nanosecond());
    if to_in_month < from_in_month {
        months -= 1;
    }

    months.max(0)
}

/// Standing given a payment count and registration time
pub fn compute(payment_count: i64, registered_at: DateTime<Utc>, now: DateTime<Utc>) -> Standing {
    let months_since_registration = months_between(registered_at, now);
    let required_payments = months_since_registration.max(1);

    Standing {
        payment_count,
        months_since_registration,
        required_payments,
        is_up_to_date: payment_count >= required_payments,
    }
}
