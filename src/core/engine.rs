use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::cashflow::{AmortisingLoan, GrowingSeries};
use super::error::ProjectionError;
use super::resolver::{CyclePolicy, resolve};
use super::types::{Assumptions, Milestone, MilestoneType, ProjectionRow, ProjectionSummary};

pub const DEFAULT_INFLATION: f64 = 0.03;
pub const DEFAULT_ASSET_RETURN: f64 = 0.08;
pub const DEFAULT_COST_OF_DEBT: f64 = 0.06;
/// Latest age a projection may run to.
pub const MAX_PROJECTION_AGE: i32 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectionConfig {
    /// Growth applied to income/expense streams without their own rate.
    pub inflation_default: f64,
    /// Explicit macro levers; derived from the opening balances when unset.
    pub assumptions: Option<Assumptions>,
    pub cycle_policy: CyclePolicy,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            inflation_default: DEFAULT_INFLATION,
            assumptions: None,
            cycle_policy: CyclePolicy::Fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LoanTemplate {
    principal: f64,
    rate: Option<f64>,
    term: Option<u32>,
    payment: Option<f64>,
}

impl LoanTemplate {
    fn instantiate(&self, cost_of_debt: f64) -> AmortisingLoan {
        AmortisingLoan::from_terms(
            self.principal,
            self.rate.unwrap_or(cost_of_debt),
            self.term,
            self.payment,
        )
    }
}

/// Year-stepped balance sheet projection built from one milestone set.
#[derive(Debug, Clone)]
pub struct DcfModel {
    pub start_age: i32,
    pub end_age: i32,
    pub assumptions: Assumptions,
    pub initial_assets: f64,
    pub initial_liabilities: f64,
    pub income_streams: Vec<GrowingSeries>,
    pub expense_streams: Vec<GrowingSeries>,
    asset_events: BTreeMap<i32, f64>,
    loan_templates: BTreeMap<i32, Vec<LoanTemplate>>,
    /// Milestones whose references formed a cycle and fell back to stored values.
    pub cycles: Vec<String>,
}

impl DcfModel {
    pub fn from_milestones(
        milestones: &[Milestone],
        config: &ProjectionConfig,
    ) -> Result<Self, ProjectionError> {
        if milestones.is_empty() {
            return Err(ProjectionError::EmptyMilestones);
        }

        let resolution = resolve(milestones, config.cycle_policy)?;
        let start_age = resolution.ages.iter().copied().min().unwrap_or_default();
        let mut end_age = (0..milestones.len())
            .map(|i| resolution.horizon_of(i))
            .max()
            .unwrap_or(start_age);
        if let Some(inheritance_age) = resolution.inheritance_age {
            end_age = end_age.min(inheritance_age);
        }
        let end_age = end_age.max(start_age);
        if start_age < 0 || end_age > MAX_PROJECTION_AGE {
            return Err(ProjectionError::HorizonOutOfRange { start_age, end_age });
        }

        let inflation = config
            .assumptions
            .map(|a| a.inflation)
            .unwrap_or(config.inflation_default);

        let mut initial_assets = 0.0;
        let mut initial_liabilities = 0.0;
        let mut opening_asset_rates: Vec<(f64, f64)> = Vec::new();
        let mut income_streams = Vec::new();
        let mut expense_streams = Vec::new();
        let mut asset_events: BTreeMap<i32, f64> = BTreeMap::new();
        let mut loan_templates: BTreeMap<i32, Vec<LoanTemplate>> = BTreeMap::new();

        for (index, milestone) in milestones.iter().enumerate() {
            let age = resolution.ages[index];
            let duration = resolution.durations[index];
            let opening = age == start_age;

            match milestone.milestone_type {
                MilestoneType::Income | MilestoneType::Expense => {
                    let amount = if milestone.is_monthly() {
                        milestone.amount * 12.0
                    } else {
                        milestone.amount
                    };
                    let series = GrowingSeries::new(
                        amount,
                        milestone.rate_of_return.unwrap_or(inflation),
                    )
                    .starting_at(i64::from(age) - i64::from(start_age))
                    .lasting(duration);
                    if milestone.milestone_type == MilestoneType::Income {
                        income_streams.push(series);
                    } else {
                        expense_streams.push(series);
                    }
                }
                MilestoneType::Asset if opening => {
                    initial_assets += milestone.amount;
                    if let Some(rate) = milestone.rate_of_return {
                        opening_asset_rates.push((milestone.amount, rate));
                    }
                }
                MilestoneType::Asset => {
                    *asset_events.entry(age).or_insert(0.0) += milestone.amount;
                }
                MilestoneType::Liability => {
                    if opening {
                        initial_liabilities += milestone.amount;
                    }
                    let payment = milestone.payment.map(|p| {
                        if milestone.is_monthly() { p * 12.0 } else { p }
                    });
                    loan_templates.entry(age).or_default().push(LoanTemplate {
                        principal: milestone.amount,
                        rate: milestone.rate_of_return,
                        term: duration,
                        payment,
                    });
                }
            }
        }

        let assumptions = config.assumptions.unwrap_or_else(|| Assumptions {
            inflation: config.inflation_default,
            rate_of_return: weighted_asset_return(&opening_asset_rates),
            cost_of_debt: DEFAULT_COST_OF_DEBT,
        });

        Ok(Self {
            start_age,
            end_age,
            assumptions,
            initial_assets,
            initial_liabilities,
            income_streams,
            expense_streams,
            asset_events,
            loan_templates,
            cycles: resolution.cycles,
        })
    }

    pub fn run(&self) -> Projection {
        let mut rows = Vec::with_capacity(self.end_age.abs_diff(self.start_age) as usize + 1);
        let mut active_loans: Vec<AmortisingLoan> = Vec::new();
        let mut assets = self.initial_assets;

        for age in self.start_age..=self.end_age {
            let t = i64::from(age) - i64::from(self.start_age);

            if let Some(templates) = self.loan_templates.get(&age) {
                active_loans.extend(
                    templates
                        .iter()
                        .map(|tpl| tpl.instantiate(self.assumptions.cost_of_debt)),
                );
            }

            let beginning_assets = assets + self.asset_events.get(&age).copied().unwrap_or(0.0);
            let beginning_liabilities: f64 =
                active_loans.iter().map(|l| l.principal_remaining).sum();
            let salary: f64 = self.income_streams.iter().map(|s| s.value_at(t)).sum();
            let expenses: f64 = self.expense_streams.iter().map(|s| s.value_at(t)).sum();
            let assets_income = beginning_assets * self.assumptions.rate_of_return;

            let mut liabilities_expense = 0.0;
            for loan in &mut active_loans {
                let (paid, _) = loan.make_payment();
                liabilities_expense += paid;
            }
            active_loans.retain(|loan| !loan.is_exhausted());

            let net_saving = salary - expenses - liabilities_expense;
            assets = beginning_assets + assets_income + net_saving;

            rows.push(ProjectionRow {
                age,
                beginning_assets: round10(beginning_assets),
                assets_income: round10(assets_income),
                beginning_liabilities: round10(beginning_liabilities),
                liabilities_expense: round10(liabilities_expense),
                salary: round10(salary),
                expenses: round10(expenses),
            });
        }

        Projection { rows }
    }
}

fn weighted_asset_return(opening_asset_rates: &[(f64, f64)]) -> f64 {
    if opening_asset_rates.is_empty() {
        return DEFAULT_ASSET_RETURN;
    }
    let total: f64 = opening_asset_rates.iter().map(|(amount, _)| amount).sum();
    if total == 0.0 {
        return 0.0;
    }
    opening_asset_rates
        .iter()
        .map(|(amount, rate)| amount * rate)
        .sum::<f64>()
        / total
}

/// Rounds to 10 decimal places; values too large to carry that precision are
/// returned unchanged.
fn round10(value: f64) -> f64 {
    const SCALE: f64 = 1e10;
    let scaled = value * SCALE;
    if !scaled.is_finite() || scaled.abs() >= 1e16 {
        return value;
    }
    scaled.round() / SCALE
}

pub fn project(
    milestones: &[Milestone],
    config: &ProjectionConfig,
) -> Result<Projection, ProjectionError> {
    Ok(DcfModel::from_milestones(milestones, config)?.run())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    rows: Vec<ProjectionRow>,
}

impl Projection {
    pub fn rows(&self) -> &[ProjectionRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ProjectionRow> {
        self.rows
    }

    pub fn last_age(&self) -> Option<i32> {
        self.rows.last().map(|r| r.age)
    }

    pub fn balance_at(&self, age: i32) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.age == age)
            .map(|r| r.beginning_assets)
    }

    pub fn ending_assets(&self) -> f64 {
        self.rows.last().map(|r| r.beginning_assets).unwrap_or(0.0)
    }

    pub fn ending_liabilities(&self) -> f64 {
        self.rows
            .last()
            .map(|r| r.beginning_liabilities)
            .unwrap_or(0.0)
    }

    /// Beginning assets at `age` when the projection reaches it, else at the last row.
    pub fn anchor_balance(&self, age: Option<i32>) -> f64 {
        age.and_then(|a| self.balance_at(a))
            .unwrap_or_else(|| self.ending_assets())
    }

    pub fn summary(&self) -> ProjectionSummary {
        let ending_assets = self.ending_assets();
        let ending_liabilities = self.ending_liabilities();
        ProjectionSummary {
            ending_assets,
            ending_liabilities,
            net_worth: ending_assets - ending_liabilities,
        }
    }
}
