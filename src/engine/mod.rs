//! Evaluation Engine - comparison policy over resolved thresholds
//!
//! A pure function from (metric, threshold, operator) to status and
//! excess. All arithmetic is `Decimal`; an undefined metric (zero
//! denominator, missing input) downgrades to N/A rather than erroring so
//! one bad metric cannot abort a batch.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{ComparisonOperator, PassFailStatus, PortfolioMetric};

/// Outcome of a single comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub status: PassFailStatus,
    /// Shortfall (minimum tests) or overage (maximum tests); zero when
    /// passing, `None` when the metric is undefined
    pub excess_amount: Option<Decimal>,
}

impl Evaluation {
    /// N/A outcome for an undefined metric or inactive test
    pub fn not_applicable() -> Self {
        Evaluation {
            status: PassFailStatus::NotApplicable,
            excess_amount: None,
        }
    }
}

/// Evaluate a metric against a threshold under the given operator
///
/// The metric is undefined when its denominator is zero; that yields N/A
/// with no excess, never a panic or an error.
pub fn evaluate(
    metric: &PortfolioMetric,
    threshold: Decimal,
    operator: ComparisonOperator,
) -> Evaluation {
    if metric.denominator.is_zero() {
        return Evaluation::not_applicable();
    }
    compare(metric.calculated_value, threshold, operator)
}

/// Comparison policy, explicit per operator
pub fn compare(value: Decimal, threshold: Decimal, operator: ComparisonOperator) -> Evaluation {
    let passed = match operator {
        ComparisonOperator::MinimumStrict => value > threshold,
        ComparisonOperator::MinimumInclusive => value >= threshold,
        ComparisonOperator::MaximumStrict => value < threshold,
        ComparisonOperator::MaximumInclusive => value <= threshold,
    };

    let shortfall = if operator.is_minimum() {
        threshold - value
    } else {
        value - threshold
    };
    let excess = shortfall.max(Decimal::ZERO);

    Evaluation {
        status: if passed {
            PassFailStatus::Pass
        } else {
            PassFailStatus::Fail
        },
        excess_amount: Some(excess),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn metric(value: &str) -> PortfolioMetric {
        PortfolioMetric {
            numerator: dec(value),
            denominator: Decimal::ONE,
            calculated_value: dec(value),
        }
    }

    #[test]
    fn minimum_strict_pass_with_zero_excess() {
        // Senior Secured Loans at 92% against a 90% floor
        let result = evaluate(&metric("0.92"), dec("0.90"), ComparisonOperator::MinimumStrict);
        assert_eq!(result.status, PassFailStatus::Pass);
        assert_eq!(result.excess_amount, Some(Decimal::ZERO));
    }

    #[test]
    fn minimum_strict_fail_reports_shortfall() {
        let result = evaluate(&metric("0.85"), dec("0.90"), ComparisonOperator::MinimumStrict);
        assert_eq!(result.status, PassFailStatus::Fail);
        assert_eq!(result.excess_amount, Some(dec("0.05")));
    }

    #[test]
    fn minimum_strict_fails_exactly_at_threshold() {
        let result = evaluate(&metric("0.90"), dec("0.90"), ComparisonOperator::MinimumStrict);
        assert_eq!(result.status, PassFailStatus::Fail);
        assert_eq!(result.excess_amount, Some(Decimal::ZERO));
    }

    #[test]
    fn minimum_inclusive_passes_exactly_at_threshold() {
        let result = evaluate(
            &metric("425"),
            dec("425"),
            ComparisonOperator::MinimumInclusive,
        );
        assert_eq!(result.status, PassFailStatus::Pass);
    }

    #[test]
    fn maximum_strict_fail_reports_overage() {
        // Cov-Lite at 55% against a 50% ceiling
        let result = evaluate(&metric("0.55"), dec("0.50"), ComparisonOperator::MaximumStrict);
        assert_eq!(result.status, PassFailStatus::Fail);
        assert_eq!(result.excess_amount, Some(dec("0.05")));
    }

    #[test]
    fn maximum_strict_fails_exactly_at_threshold() {
        let result = evaluate(&metric("0.60"), dec("0.60"), ComparisonOperator::MaximumStrict);
        assert_eq!(result.status, PassFailStatus::Fail);
        assert_eq!(result.excess_amount, Some(Decimal::ZERO));
    }

    #[test]
    fn maximum_inclusive_passes_exactly_at_threshold() {
        let result = evaluate(
            &metric("2720"),
            dec("2720"),
            ComparisonOperator::MaximumInclusive,
        );
        assert_eq!(result.status, PassFailStatus::Pass);
    }

    #[test]
    fn zero_denominator_is_not_applicable() {
        let undefined = PortfolioMetric {
            numerator: Decimal::ZERO,
            denominator: Decimal::ZERO,
            calculated_value: Decimal::ZERO,
        };
        let result = evaluate(&undefined, dec("0.90"), ComparisonOperator::MinimumStrict);
        assert_eq!(result.status, PassFailStatus::NotApplicable);
        assert_eq!(result.excess_amount, None);
    }

    #[test]
    fn decimal_comparison_has_no_float_rounding_flips() {
        // 0.9 must compare equal to 0.90, not 0.899999...
        let result = evaluate(&metric("0.9"), dec("0.90"), ComparisonOperator::MinimumInclusive);
        assert_eq!(result.status, PassFailStatus::Pass);
        assert_eq!(result.excess_amount, Some(Decimal::ZERO));
    }
}
