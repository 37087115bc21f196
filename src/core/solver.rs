use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{Projection, ProjectionConfig, project};
use super::error::{ProjectionError, SolverError};
use super::types::{Goal, MAX_AGE, MAX_DURATION, Milestone, ParameterName, ScenarioParameterValue};

const SMALL_VALUE_LIMIT: f64 = 1e5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SolverConfig {
    pub max_iterations: u32,
    pub tolerance: f64,
    pub max_expansions: u32,
    pub age_min: i32,
    pub age_max: i32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            tolerance: 0.01,
            max_expansions: 10,
            age_min: 0,
            age_max: MAX_AGE,
        }
    }
}

/// Balance the solver tries to reproduce, read at `age` when the projection
/// reaches it and at its last row otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub balance: f64,
    pub age: Option<i32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolveStatus {
    Converged,
    Unconverged,
    NotBracketed,
    DiscreteFallback,
    TargetDefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveStep {
    pub candidate: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveResult {
    pub milestone_id: i64,
    pub parameter: ParameterName,
    pub solved_value: f64,
    pub status: SolveStatus,
    pub converged: bool,
    pub message: String,
    pub target_balance: f64,
    pub achieved_balance: f64,
    pub steps: Vec<SolveStep>,
    pub milestones: Vec<Milestone>,
    pub projection: Projection,
}

pub struct GoalSolver<'a> {
    milestones: &'a [Milestone],
    anchor: Anchor,
    config: SolverConfig,
    projection: ProjectionConfig,
}

impl<'a> GoalSolver<'a> {
    pub fn new(milestones: &'a [Milestone], anchor: Anchor, config: SolverConfig) -> Self {
        Self {
            milestones,
            anchor,
            config,
            projection: ProjectionConfig::default(),
        }
    }

    pub fn with_projection(mut self, projection: ProjectionConfig) -> Self {
        self.projection = projection;
        self
    }

    /// Applies `value` to a private copy of the set, then searches the goal
    /// field for the value whose projection lands on the anchor balance.
    pub fn solve(
        &self,
        goal: &Goal,
        value: &ScenarioParameterValue,
    ) -> Result<GoalSolveResult, SolverError> {
        validate_config(&self.config)?;
        if !goal.parameter.is_numeric() {
            return Err(SolverError::NonNumericGoal(goal.parameter));
        }

        let mut base = self.milestones.to_vec();
        value.apply(&mut base)?;
        let index = base
            .iter()
            .position(|m| m.id == goal.milestone_id)
            .ok_or(ProjectionError::UnknownMilestone(goal.milestone_id))?;
        let parameter = goal.parameter;
        let current = base[index].numeric_value(parameter).unwrap_or(0.0);
        let target = self.anchor.balance;

        let mut search = Search {
            solver: self,
            base: &base,
            index,
            parameter,
            steps: Vec::new(),
        };

        let (mut low, mut high) = initial_bounds(current);
        let mut d_low = search.balance(low)? - target;
        let mut d_high = search.balance(high)? - target;
        let mut expansions = 0;
        while !brackets(d_low, d_high) && expansions < self.config.max_expansions {
            let span = (high - low).abs();
            low -= span;
            high += span;
            expansions += 1;
            debug!(%parameter, low, high, expansions, "expanding goal search bounds");
            d_low = search.balance(low)? - target;
            d_high = search.balance(high)? - target;
        }
        let bracketed = brackets(d_low, d_high);

        let (solved_value, status) = if !bracketed && parameter.is_age_like() {
            (search.closest_age(target, current)?, SolveStatus::DiscreteFallback)
        } else {
            let mut mid = 0.5 * (low + high);
            let mut status = if bracketed {
                SolveStatus::Unconverged
            } else {
                SolveStatus::NotBracketed
            };
            for _ in 0..self.config.max_iterations {
                mid = 0.5 * (low + high);
                let d_mid = search.balance(mid)? - target;
                if d_mid.abs() <= self.config.tolerance {
                    status = SolveStatus::Converged;
                    break;
                }
                if brackets(d_low, d_mid) {
                    high = mid;
                } else {
                    low = mid;
                    d_low = d_mid;
                }
            }
            (self.applied_value(parameter, mid), status)
        };

        let steps = search.steps;
        let mut milestones = base;
        milestones[index].set_numeric(parameter, solved_value)?;
        let projection = project(&milestones, &self.projection)?;
        let achieved_balance = projection.anchor_balance(self.anchor.age);

        let message = match status {
            SolveStatus::Converged => "Solved goal within tolerance.",
            SolveStatus::Unconverged => {
                "Reached max iterations before tolerance was met; returning best estimate."
            }
            SolveStatus::NotBracketed => {
                "Target balance was never bracketed; returning last midpoint."
            }
            SolveStatus::DiscreteFallback => {
                "Target balance was never bracketed; returning the closest whole age."
            }
            SolveStatus::TargetDefined => "Value defined by the target sub-scenario.",
        }
        .to_string();
        debug!(
            milestone_id = goal.milestone_id,
            %parameter,
            solved_value,
            ?status,
            steps = steps.len(),
            "goal solve finished"
        );

        Ok(GoalSolveResult {
            milestone_id: goal.milestone_id,
            parameter,
            solved_value,
            status,
            converged: status == SolveStatus::Converged,
            message,
            target_balance: target,
            achieved_balance,
            steps,
            milestones,
            projection,
        })
    }

    /// The value actually written into the milestone for a candidate.
    fn applied_value(&self, parameter: ParameterName, candidate: f64) -> f64 {
        match parameter {
            ParameterName::AgeAtOccurrence => candidate
                .round()
                .clamp(self.config.age_min as f64, self.config.age_max as f64),
            ParameterName::Duration => candidate.round().clamp(0.0, f64::from(MAX_DURATION)),
            _ => candidate,
        }
    }
}

struct Search<'s, 'a> {
    solver: &'s GoalSolver<'a>,
    base: &'s [Milestone],
    index: usize,
    parameter: ParameterName,
    steps: Vec<SolveStep>,
}

impl Search<'_, '_> {
    fn balance(&mut self, candidate: f64) -> Result<f64, SolverError> {
        let applied = self.solver.applied_value(self.parameter, candidate);
        let mut milestones = self.base.to_vec();
        milestones[self.index].set_numeric(self.parameter, applied)?;
        let balance = project(&milestones, &self.solver.projection)?
            .anchor_balance(self.solver.anchor.age);
        self.steps.push(SolveStep { candidate, balance });
        Ok(balance)
    }

    fn closest_age(&mut self, target: f64, current: f64) -> Result<f64, SolverError> {
        let config = self.solver.config;
        let best = closest_whole_age(config.age_min..=config.age_max, |age| {
            Ok::<_, SolverError>((self.balance(f64::from(age))? - target).abs())
        })?;
        Ok(best
            .map(f64::from)
            .unwrap_or_else(|| self.solver.applied_value(self.parameter, current)))
    }
}

/// Whole age in `ages` with the smallest gap; the earliest wins ties and NaN
/// gaps are ignored.
fn closest_whole_age<E>(
    ages: RangeInclusive<i32>,
    mut gap: impl FnMut(i32) -> Result<f64, E>,
) -> Result<Option<i32>, E> {
    let mut best: Option<(i32, f64)> = None;
    for age in ages {
        let g = gap(age)?;
        if g.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, best_gap)| g < best_gap) {
            best = Some((age, g));
        }
    }
    Ok(best.map(|(age, _)| age))
}

fn initial_bounds(value: f64) -> (f64, f64) {
    let (low, high) = if (0.0..SMALL_VALUE_LIMIT).contains(&value) {
        (0.0, 120.0)
    } else if value > 0.0 {
        (0.0, 2.0 * value + 1.0)
    } else {
        (2.0 * value, 1.0)
    };
    (low, high.max(low + 1.0))
}

fn brackets(a: f64, b: f64) -> bool {
    (a <= 0.0 && b >= 0.0) || (a >= 0.0 && b <= 0.0)
}

fn validate_config(config: &SolverConfig) -> Result<(), SolverError> {
    if config.max_iterations == 0 {
        return Err(SolverError::InvalidConfig(
            "max_iterations must be > 0".to_string(),
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(SolverError::InvalidConfig("tolerance must be > 0".to_string()));
    }
    if config.age_min < 0 || config.age_max > MAX_AGE {
        return Err(SolverError::InvalidConfig(format!(
            "age range must lie within 0..={MAX_AGE}"
        )));
    }
    if config.age_max < config.age_min {
        return Err(SolverError::InvalidConfig(
            "age_max must be >= age_min".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Assumptions;
    use crate::core::types::MilestoneType::{Asset, Expense, Income};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn flat_assumptions() -> ProjectionConfig {
        ProjectionConfig {
            assumptions: Some(Assumptions {
                inflation: 0.0,
                rate_of_return: 0.0,
                cost_of_debt: 0.0,
            }),
            ..ProjectionConfig::default()
        }
    }

    fn retirement_plan() -> Vec<Milestone> {
        vec![
            Milestone::new(1, "Savings", Asset, 30, 100_000.0).with_rate(0.05),
            Milestone::new(2, "Salary", Income, 30, 60_000.0)
                .with_rate(0.0)
                .ends_at("Retirement"),
            Milestone::new(3, "Retirement", Expense, 60, 40_000.0)
                .with_rate(0.0)
                .perpetuity(),
            Milestone::new(4, "Inheritance", Asset, 90, 0.0),
        ]
    }

    #[test]
    fn bisection_converges_on_continuous_goal() {
        let set = vec![
            Milestone::new(1, "Savings", Asset, 30, 0.0).with_rate(0.0),
            Milestone::new(2, "Salary", Income, 30, 20_000.0)
                .with_rate(0.0)
                .fixed_duration(10),
        ];
        let anchor = Anchor {
            balance: 500_000.0,
            age: None,
        };
        let solver = GoalSolver::new(&set, anchor, SolverConfig::default());
        let result = solver
            .solve(
                &Goal::new(2, ParameterName::Amount),
                &ScenarioParameterValue::new(1, ParameterName::RateOfReturn, "0"),
            )
            .expect("must solve");

        assert_eq!(result.status, SolveStatus::Converged);
        assert!(result.converged);
        assert_close(result.achieved_balance, 500_000.0, 0.01);
        assert_close(result.solved_value, 50_000.0, 0.01);
        assert_close(result.milestones[1].amount, result.solved_value, 1e-12);
        assert!(!result.steps.is_empty());
    }

    #[test]
    fn retirement_age_moves_earlier_as_returns_rise() {
        let set = retirement_plan();
        let anchor = Anchor {
            balance: 0.0,
            age: Some(90),
        };
        let solver = GoalSolver::new(&set, anchor, SolverConfig::default());
        let goal = Goal::new(3, ParameterName::AgeAtOccurrence);

        let ages: Vec<f64> = ["0.02", "0.05", "0.08", "0.12"]
            .iter()
            .map(|rate| {
                let value = ScenarioParameterValue::new(1, ParameterName::RateOfReturn, rate);
                let result = solver.solve(&goal, &value).expect("must solve");
                assert_ne!(result.status, SolveStatus::NotBracketed);
                assert_eq!(result.solved_value.fract(), 0.0);
                result.solved_value
            })
            .collect();

        for pair in ages.windows(2) {
            assert!(pair[1] < pair[0], "ages not decreasing: {ages:?}");
        }
        assert!((30.0..=60.0).contains(&ages[0]));
    }

    #[test]
    fn solved_retirement_age_falls_as_portfolio_rate_rises() {
        let set = vec![
            Milestone::new(1, "Salary", Income, 30, 110_000.0).fixed_duration(6),
            Milestone::new(2, "Living", Expense, 30, 60_000.0).fixed_duration(6),
            Milestone::new(3, "Portfolio", Asset, 30, 100_000.0).with_rate(0.10),
            Milestone::new(4, "Retirement", Expense, 36, 55_000.0).fixed_duration(5),
        ];
        let baseline = project(&set, &ProjectionConfig::default()).expect("baseline");
        let anchor = Anchor {
            balance: baseline.anchor_balance(None),
            age: None,
        };
        let solver = GoalSolver::new(&set, anchor, SolverConfig::default());
        let goal = Goal::new(4, ParameterName::AgeAtOccurrence);
        let solve_at = |rate: &str| {
            solver
                .solve(
                    &goal,
                    &ScenarioParameterValue::new(3, ParameterName::RateOfReturn, rate),
                )
                .expect("must solve")
        };

        let unperturbed = solve_at("0.10");
        assert_eq!(unperturbed.status, SolveStatus::Converged);
        assert_eq!(unperturbed.solved_value, 36.0);

        let ages: Vec<f64> = ["0.02", "0.05", "0.10", "0.20"]
            .into_iter()
            .map(|rate| solve_at(rate).solved_value)
            .collect();
        for pair in ages.windows(2) {
            assert!(pair[1] < pair[0], "ages not decreasing: {ages:?}");
        }
    }

    #[test]
    fn unbracketed_age_goal_falls_back_to_closest_whole_age() {
        // Salary runs until the windfall, and nothing after 60 is counted, so
        // the balance peaks when the windfall lands exactly at 60 and never
        // reaches the anchor.
        let set = vec![
            Milestone::new(1, "Savings", Asset, 30, 0.0).with_rate(0.0),
            Milestone::new(2, "Job", Income, 30, 1_000.0)
                .with_rate(0.0)
                .ends_at("Windfall"),
            Milestone::new(3, "Windfall", Asset, 45, 1_000.0),
            Milestone::new(4, "Inheritance", Asset, 60, 0.0),
        ];
        let anchor = Anchor {
            balance: 100_000.0,
            age: None,
        };
        let result = GoalSolver::new(&set, anchor, SolverConfig::default())
            .with_projection(flat_assumptions())
            .solve(
                &Goal::new(3, ParameterName::AgeAtOccurrence),
                &ScenarioParameterValue::new(3, ParameterName::Amount, "1000"),
            )
            .expect("must return result");

        assert_eq!(result.status, SolveStatus::DiscreteFallback);
        assert!(!result.converged);
        assert_eq!(result.solved_value, 60.0);
        assert_eq!(result.milestones[2].age_at_occurrence, 60);
        assert_close(result.achieved_balance, 31_000.0, 1e-9);
    }

    #[test]
    fn closest_whole_age_picks_interior_minimum() {
        let best = closest_whole_age(0..=120, |age| {
            Ok::<_, ()>((f64::from(age) - 47.0).powi(2) + 3.0)
        });
        assert_eq!(best, Ok(Some(47)));

        let best = closest_whole_age(20..=80, |age| Ok::<_, ()>((f64::from(age) - 61.0).abs()));
        assert_eq!(best, Ok(Some(61)));
    }

    #[test]
    fn closest_whole_age_keeps_earliest_tie_and_skips_nan() {
        let best = closest_whole_age(0..=10, |age| {
            Ok::<_, ()>(match age {
                0 | 1 => f64::NAN,
                3 | 7 => 1.0,
                _ => 5.0,
            })
        });
        assert_eq!(best, Ok(Some(3)));

        let none = closest_whole_age(0..=3, |_| Ok::<_, ()>(f64::NAN));
        assert_eq!(none, Ok(None));

        let err = closest_whole_age(0..=3, |age| if age == 2 { Err("boom") } else { Ok(1.0) });
        assert_eq!(err, Err("boom"));
    }

    #[test]
    fn insensitive_numeric_goal_reports_not_bracketed() {
        let set = vec![
            Milestone::new(1, "Savings", Asset, 30, 10_000.0),
            Milestone::new(2, "Holiday", Expense, 31, 2_000.0).fixed_duration(0),
        ];
        let anchor = Anchor {
            balance: 50_000.0,
            age: None,
        };
        let result = GoalSolver::new(&set, anchor, SolverConfig::default())
            .with_projection(flat_assumptions())
            .solve(
                &Goal::new(2, ParameterName::Amount),
                &ScenarioParameterValue::new(1, ParameterName::Amount, "10000"),
            )
            .expect("must return result");
        assert_eq!(result.status, SolveStatus::NotBracketed);
        assert!(result.solved_value.is_finite());
    }

    #[test]
    fn non_numeric_goal_is_rejected() {
        let set = retirement_plan();
        let anchor = Anchor {
            balance: 0.0,
            age: None,
        };
        let err = GoalSolver::new(&set, anchor, SolverConfig::default())
            .solve(
                &Goal::new(3, ParameterName::Occurrence),
                &ScenarioParameterValue::new(1, ParameterName::RateOfReturn, "0.05"),
            )
            .expect_err("non-numeric goal");
        assert_eq!(err, SolverError::NonNumericGoal(ParameterName::Occurrence));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let set = retirement_plan();
        let anchor = Anchor {
            balance: 0.0,
            age: None,
        };
        let config = SolverConfig {
            tolerance: 0.0,
            ..SolverConfig::default()
        };
        let err = GoalSolver::new(&set, anchor, config)
            .solve(
                &Goal::new(3, ParameterName::AgeAtOccurrence),
                &ScenarioParameterValue::new(1, ParameterName::RateOfReturn, "0.05"),
            )
            .expect_err("bad tolerance");
        assert!(matches!(err, SolverError::InvalidConfig(_)));
    }

    #[test]
    fn age_range_beyond_override_limits_is_rejected() {
        let set = retirement_plan();
        let anchor = Anchor {
            balance: 0.0,
            age: None,
        };
        for config in [
            SolverConfig {
                age_min: -5,
                ..SolverConfig::default()
            },
            SolverConfig {
                age_max: MAX_AGE + 1,
                ..SolverConfig::default()
            },
        ] {
            let err = GoalSolver::new(&set, anchor, config)
                .solve(
                    &Goal::new(3, ParameterName::AgeAtOccurrence),
                    &ScenarioParameterValue::new(1, ParameterName::RateOfReturn, "0.05"),
                )
                .expect_err("age range");
            assert!(matches!(err, SolverError::InvalidConfig(_)));
        }
    }

    #[test]
    fn bounds_follow_value_magnitude() {
        assert_eq!(initial_bounds(50_000.0), (0.0, 120.0));
        assert_eq!(initial_bounds(200_000.0), (0.0, 400_001.0));
        assert_eq!(initial_bounds(-10.0), (-20.0, 1.0));
        assert_eq!(initial_bounds(-0.25), (-0.5, 1.0));
    }
}
