/// Principal at or below this is treated as repaid.
pub const LOAN_EPSILON: f64 = 1e-8;

/// `base * (1 + rate)^periods` that saturates to an infinity instead of
/// producing NaN when the power overflows.
pub fn compound(base: f64, rate: f64, periods: i64) -> f64 {
    if base == 0.0 {
        return 0.0;
    }
    let exponent = periods.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    let factor = (1.0 + rate).powi(exponent);
    if factor.is_infinite() || factor.is_nan() {
        return f64::INFINITY.copysign(base);
    }
    let value = base * factor;
    if value.is_nan() {
        return f64::INFINITY.copysign(base);
    }
    value
}

/// Geometric cash-flow active on `[start_step, start_step + duration)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowingSeries {
    pub initial_value: f64,
    pub growth_rate: f64,
    pub start_step: i64,
    pub duration: Option<u32>,
}

impl GrowingSeries {
    pub fn new(initial_value: f64, growth_rate: f64) -> Self {
        Self {
            initial_value,
            growth_rate,
            start_step: 0,
            duration: None,
        }
    }

    pub fn starting_at(mut self, start_step: i64) -> Self {
        self.start_step = start_step;
        self
    }

    pub fn lasting(mut self, duration: Option<u32>) -> Self {
        self.duration = duration;
        self
    }

    pub fn value_at(&self, step: i64) -> f64 {
        if step < self.start_step {
            return 0.0;
        }
        let rel_step = step - self.start_step;
        if let Some(duration) = self.duration {
            if rel_step >= i64::from(duration) {
                return 0.0;
            }
        }
        compound(self.initial_value, self.growth_rate, rel_step)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoanTerm {
    Remaining(i64),
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmortisingLoan {
    pub principal_remaining: f64,
    pub annual_rate: f64,
    pub duration_remaining: LoanTerm,
    pub payment: f64,
}

impl AmortisingLoan {
    /// Builds a schedule from milestone terms. An explicit payment is honoured
    /// as given; otherwise the level annuity payment is derived, or the loan is
    /// interest-only when it has no term.
    pub fn from_terms(
        principal: f64,
        rate: f64,
        term: Option<u32>,
        payment_override: Option<f64>,
    ) -> Self {
        let duration_remaining = match term {
            Some(years) => LoanTerm::Remaining(i64::from(years.max(1))),
            None => LoanTerm::Unbounded,
        };
        let payment = match (payment_override, term) {
            (Some(payment), _) => payment,
            (None, None) => principal * rate,
            (None, Some(years)) => annuity_payment(principal, rate, years.max(1)),
        };
        Self {
            principal_remaining: principal,
            annual_rate: rate,
            duration_remaining,
            payment,
        }
    }

    /// Applies one yearly period and returns `(total_payment, principal_repaid)`.
    pub fn make_payment(&mut self) -> (f64, f64) {
        if self.principal_remaining <= 0.0 {
            return (0.0, 0.0);
        }

        let interest = self.principal_remaining * self.annual_rate;
        let (total_payment, principal_repaid) = match self.duration_remaining {
            LoanTerm::Unbounded => (interest, 0.0),
            LoanTerm::Remaining(left) => {
                self.duration_remaining = LoanTerm::Remaining(left - 1);
                let repaid = (self.payment - interest)
                    .max(0.0)
                    .min(self.principal_remaining);
                (self.payment, repaid)
            }
        };

        self.principal_remaining -= principal_repaid;
        (total_payment, principal_repaid)
    }

    pub fn is_exhausted(&self) -> bool {
        self.principal_remaining <= LOAN_EPSILON
    }
}

fn annuity_payment(principal: f64, rate: f64, years: u32) -> f64 {
    if rate == 0.0 {
        return principal / years as f64;
    }
    let discount = compound(1.0, rate, -i64::from(years));
    let denom = 1.0 - discount;
    if denom == 0.0 || !denom.is_finite() {
        return principal * rate;
    }
    principal * rate / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn series_is_inactive_before_start_and_after_duration() {
        let series = GrowingSeries::new(1_000.0, 0.05)
            .starting_at(3)
            .lasting(Some(2));
        assert_eq!(series.value_at(2), 0.0);
        assert_approx(series.value_at(3), 1_000.0);
        assert_approx(series.value_at(4), 1_050.0);
        assert_eq!(series.value_at(5), 0.0);
    }

    #[test]
    fn open_ended_series_keeps_growing() {
        let series = GrowingSeries::new(100.0, 0.10);
        assert_approx(series.value_at(10), 100.0 * 1.1_f64.powi(10));
    }

    #[test]
    fn compound_saturates_instead_of_overflowing() {
        assert_eq!(compound(1.0, 10.0, 1_000), f64::INFINITY);
        assert_eq!(compound(-5.0, 10.0, 1_000), f64::NEG_INFINITY);
        assert_eq!(compound(0.0, 10.0, 1_000), 0.0);
        assert_approx(compound(2.0, 0.5, 2), 4.5);
    }

    #[test]
    fn zero_rate_loan_repays_evenly() {
        let mut loan = AmortisingLoan::from_terms(20_000.0, 0.0, Some(4), None);
        for year in 0..4 {
            let (paid, repaid) = loan.make_payment();
            assert_approx(paid, 5_000.0);
            assert_approx(repaid, 5_000.0);
            assert_approx(loan.principal_remaining, 20_000.0 - 5_000.0 * (year + 1) as f64);
        }
        assert!(loan.is_exhausted());
        assert_eq!(loan.make_payment(), (0.0, 0.0));
    }

    #[test]
    fn unbounded_loan_is_interest_only() {
        let mut loan = AmortisingLoan::from_terms(10_000.0, 0.06, None, None);
        let (paid, repaid) = loan.make_payment();
        assert_approx(paid, 600.0);
        assert_eq!(repaid, 0.0);
        assert_approx(loan.principal_remaining, 10_000.0);
        assert_eq!(loan.duration_remaining, LoanTerm::Unbounded);
    }

    #[test]
    fn payment_override_below_interest_repays_nothing() {
        let mut loan = AmortisingLoan::from_terms(10_000.0, 0.10, Some(5), Some(500.0));
        let (paid, repaid) = loan.make_payment();
        assert_approx(paid, 500.0);
        assert_eq!(repaid, 0.0);
        assert_eq!(loan.duration_remaining, LoanTerm::Remaining(4));
    }

    #[test]
    fn oracle_annuity_payment_matches_hand_calculation() {
        // 10_000 at 5% over 3 years: 10_000 * 0.05 / (1 - 1.05^-3) = 3672.0856...
        let loan = AmortisingLoan::from_terms(10_000.0, 0.05, Some(3), None);
        assert!((loan.payment - 3_672.085_646).abs() < 1e-5);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_series_matches_closed_form_inside_window(
            initial in -100_000i32..100_000,
            growth_bp in -500i32..1500,
            start in 0i64..40,
            duration in 1u32..40,
            step in 0i64..100
        ) {
            let g = growth_bp as f64 / 10_000.0;
            let series = GrowingSeries::new(initial as f64, g)
                .starting_at(start)
                .lasting(Some(duration));
            let value = series.value_at(step);
            if step < start || step >= start + duration as i64 {
                prop_assert_eq!(value, 0.0);
            } else {
                let expected = initial as f64 * (1.0 + g).powi((step - start) as i32);
                prop_assert!((value - expected).abs() <= 1e-9 * expected.abs().max(1.0));
            }
        }

        #[test]
        fn prop_amortising_loan_clears_within_term(
            principal in 1_000u32..1_000_000,
            rate_bp in 0u32..1500,
            years in 1u32..40
        ) {
            let mut loan = AmortisingLoan::from_terms(
                principal as f64,
                rate_bp as f64 / 10_000.0,
                Some(years),
                None,
            );
            let mut previous = loan.principal_remaining;
            for _ in 0..years {
                let (paid, repaid) = loan.make_payment();
                prop_assert!(paid >= repaid);
                prop_assert!(loan.principal_remaining <= previous);
                previous = loan.principal_remaining;
            }
            prop_assert!(loan.principal_remaining <= 1e-6 * principal as f64);
        }
    }
}
