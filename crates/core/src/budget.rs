//! Department budget arithmetic.
//!
//! Budgets are monthly buckets keyed by department and `YYYY-MM`. Spend is
//! booked when an admin confirms a cab and corrected when the employee
//! reports the actual fare.

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("period `{0}` must be YYYY-MM")]
pub struct InvalidPeriod(pub String);

/// A validated `YYYY-MM` budget bucket.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BudgetPeriod(String);

impl BudgetPeriod {
    pub fn parse(raw: &str) -> Result<Self, InvalidPeriod> {
        let raw = raw.trim();
        let valid = raw.split_once('-').is_some_and(|(year, month)| {
            year.len() == 4
                && year.chars().all(|c| c.is_ascii_digit())
                && month.len() == 2
                && month.chars().all(|c| c.is_ascii_digit())
                && month.parse::<u8>().is_ok_and(|m| (1..=12).contains(&m))
        });
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(InvalidPeriod(raw.to_owned()))
        }
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(format!("{:04}-{:02}", at.year(), at.month()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BudgetPeriod {
    type Error = InvalidPeriod;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<BudgetPeriod> for String {
    fn from(period: BudgetPeriod) -> Self {
        period.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentBudget {
    pub department: String,
    pub period: BudgetPeriod,
    pub allocated: Decimal,
    pub spent: Decimal,
}

impl DepartmentBudget {
    pub fn remaining(&self) -> Decimal {
        (self.allocated - self.spent).round_dp(2)
    }

    pub fn utilization_pct(&self) -> Decimal {
        utilization(self.allocated, self.spent)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BudgetCheck {
    Untracked,
    Within { utilization_pct: Decimal },
    Warning { utilization_pct: Decimal },
    Exceeded { shortfall: Decimal },
}

impl BudgetCheck {
    pub fn blocks_approval(&self) -> bool {
        matches!(self, Self::Exceeded { .. })
    }

    pub fn shortfall(&self) -> Option<Decimal> {
        match self {
            Self::Exceeded { shortfall } => Some(*shortfall),
            _ => None,
        }
    }

    pub fn under_pressure(&self) -> bool {
        matches!(self, Self::Warning { .. } | Self::Exceeded { .. })
    }
}

/// Judges a proposed spend against a department's bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetLedger {
    warning_threshold_pct: Decimal,
}

impl BudgetLedger {
    pub fn new(warning_threshold_pct: Decimal) -> Self {
        Self { warning_threshold_pct }
    }

    pub fn evaluate(&self, budget: Option<&DepartmentBudget>, amount: Decimal) -> BudgetCheck {
        let Some(budget) = budget else {
            return BudgetCheck::Untracked;
        };

        let projected = budget.spent + amount;
        if projected > budget.allocated {
            let shortfall = (projected - budget.allocated).round_dp(2);
            return BudgetCheck::Exceeded { shortfall };
        }

        let utilization_pct = utilization(budget.allocated, projected);
        if utilization_pct >= self.warning_threshold_pct {
            BudgetCheck::Warning { utilization_pct }
        } else {
            BudgetCheck::Within { utilization_pct }
        }
    }

    /// Delta to book once the employee reports what the trip actually cost.
    pub fn fare_adjustment(estimated: Decimal, actual: Decimal) -> Decimal {
        (actual - estimated).round_dp(2)
    }
}

fn utilization(allocated: Decimal, spent: Decimal) -> Decimal {
    if allocated <= Decimal::ZERO {
        return if spent > Decimal::ZERO { HUNDRED } else { Decimal::ZERO };
    }
    (spent * HUNDRED / allocated).round_dp(2)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{BudgetCheck, BudgetLedger, BudgetPeriod, DepartmentBudget, InvalidPeriod};

    fn budget(allocated: i64, spent: i64) -> DepartmentBudget {
        DepartmentBudget {
            department: "Production".to_string(),
            period: BudgetPeriod::parse("2026-10").expect("valid period"),
            allocated: Decimal::new(allocated, 0),
            spent: Decimal::new(spent, 0),
        }
    }

    fn ledger() -> BudgetLedger {
        BudgetLedger::new(Decimal::new(80, 0))
    }

    #[test]
    fn missing_budget_is_untracked() {
        assert_eq!(ledger().evaluate(None, Decimal::new(500, 0)), BudgetCheck::Untracked);
    }

    #[test]
    fn spend_below_threshold_is_within() {
        let check = ledger().evaluate(Some(&budget(10_000, 2_000)), Decimal::new(1_000, 0));
        assert_eq!(check, BudgetCheck::Within { utilization_pct: Decimal::new(30, 0) });
        assert!(!check.blocks_approval());
        assert!(!check.under_pressure());
    }

    #[test]
    fn crossing_threshold_warns() {
        let check = ledger().evaluate(Some(&budget(10_000, 7_500)), Decimal::new(600, 0));
        assert_eq!(check, BudgetCheck::Warning { utilization_pct: Decimal::new(81, 0) });
        assert!(check.under_pressure());
        assert!(!check.blocks_approval());
    }

    #[test]
    fn exact_allocation_is_allowed_but_overrun_is_not() {
        let exact = ledger().evaluate(Some(&budget(10_000, 9_000)), Decimal::new(1_000, 0));
        assert!(!exact.blocks_approval());

        let over = ledger().evaluate(Some(&budget(10_000, 9_000)), Decimal::new(1_250, 0));
        assert_eq!(over, BudgetCheck::Exceeded { shortfall: Decimal::new(250, 0) });
        assert!(over.blocks_approval());
        assert_eq!(over.shortfall(), Some(Decimal::new(250, 0)));
        assert_eq!(exact.shortfall(), None);
    }

    #[test]
    fn threshold_comes_from_the_ledger() {
        let strict = BudgetLedger::new(Decimal::new(25, 0));
        let check = strict.evaluate(Some(&budget(10_000, 2_000)), Decimal::new(1_000, 0));
        assert_eq!(check, BudgetCheck::Warning { utilization_pct: Decimal::new(30, 0) });
    }

    #[test]
    fn zero_allocation_reports_full_utilization() {
        assert_eq!(budget(0, 100).utilization_pct(), Decimal::new(100, 0));
        assert_eq!(budget(0, 0).utilization_pct(), Decimal::ZERO);
        assert_eq!(budget(1_000, 250).remaining(), Decimal::new(750, 0));
    }

    #[test]
    fn fare_adjustment_can_be_negative() {
        assert_eq!(
            BudgetLedger::fare_adjustment(Decimal::new(1_200, 0), Decimal::new(95_050, 2)),
            Decimal::new(-24_950, 2)
        );
    }

    #[test]
    fn period_format_is_checked() {
        assert_eq!(BudgetPeriod::parse(" 2026-10 ").expect("valid").as_str(), "2026-10");
        assert_eq!(BudgetPeriod::parse("2026-13"), Err(InvalidPeriod("2026-13".to_string())));
        assert!(BudgetPeriod::parse("26-10").is_err());
        assert!(BudgetPeriod::parse("2026/10").is_err());
        assert!(BudgetPeriod::parse("2026-+1").is_err());
        assert!(BudgetPeriod::parse("").is_err());
    }

    #[test]
    fn period_from_datetime_is_zero_padded() {
        let at = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 0).single().expect("valid date");
        let period = BudgetPeriod::from_datetime(at);
        assert_eq!(period.to_string(), "2026-03");
        assert_eq!(BudgetPeriod::parse(period.as_str()), Ok(period));
    }

    #[test]
    fn period_deserialization_rejects_bad_months() {
        let ok: BudgetPeriod = toml::from_str::<Wrapper>("period = \"2026-12\"")
            .expect("valid period")
            .period;
        assert_eq!(ok.as_str(), "2026-12");
        assert!(toml::from_str::<Wrapper>("period = \"2026-00\"").is_err());
    }

    #[derive(serde::Deserialize)]
    struct Wrapper {
        period: BudgetPeriod,
    }
}
