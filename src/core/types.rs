use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ProjectionError;

/// Oldest age a milestone can be moved to by an override or a search.
pub const MAX_AGE: i32 = 120;
/// Longest literal duration an override may set (120 years of monthly terms).
pub const MAX_DURATION: u32 = 1440;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MilestoneType {
    Income,
    Expense,
    Asset,
    Liability,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DisbursementType {
    #[serde(rename = "Fixed Duration", alias = "FixedDuration", alias = "fixed-duration")]
    FixedDuration,
    #[serde(alias = "perpetuity")]
    Perpetuity,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Occurrence {
    #[default]
    #[serde(alias = "yearly")]
    Yearly,
    #[serde(alias = "monthly")]
    Monthly,
}

impl FromStr for Occurrence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yearly" => Ok(Occurrence::Yearly),
            "monthly" => Ok(Occurrence::Monthly),
            _ => Err(()),
        }
    }
}

/// Milestone fields that scenario overrides and goals are allowed to address.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterName {
    Amount,
    AgeAtOccurrence,
    Payment,
    Occurrence,
    Duration,
    RateOfReturn,
    RateOfReturnCurve,
}

impl ParameterName {
    pub const ALL: [ParameterName; 7] = [
        ParameterName::Amount,
        ParameterName::AgeAtOccurrence,
        ParameterName::Payment,
        ParameterName::Occurrence,
        ParameterName::Duration,
        ParameterName::RateOfReturn,
        ParameterName::RateOfReturnCurve,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParameterName::Amount => "amount",
            ParameterName::AgeAtOccurrence => "age_at_occurrence",
            ParameterName::Payment => "payment",
            ParameterName::Occurrence => "occurrence",
            ParameterName::Duration => "duration",
            ParameterName::RateOfReturn => "rate_of_return",
            ParameterName::RateOfReturnCurve => "rate_of_return_curve",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            ParameterName::Occurrence | ParameterName::RateOfReturnCurve
        )
    }

    /// Ages live on the human timeline and are searched over `[0, MAX_AGE]`.
    pub fn is_age_like(self) -> bool {
        self == ParameterName::AgeAtOccurrence
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            ParameterName::AgeAtOccurrence | ParameterName::Duration
        )
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterName {
    type Err = ProjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ParameterName::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| ProjectionError::UnknownParameter(wanted.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_milestone_id: Option<i64>,
    pub milestone_type: MilestoneType,
    #[serde(default)]
    pub disbursement_type: Option<DisbursementType>,
    pub age_at_occurrence: i32,
    #[serde(default)]
    pub start_after_milestone: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub duration_end_at_milestone: Option<String>,
    #[serde(default)]
    pub occurrence: Occurrence,
    pub amount: f64,
    #[serde(default)]
    pub payment: Option<f64>,
    #[serde(default)]
    pub rate_of_return: Option<f64>,
    #[serde(default)]
    pub rate_of_return_curve: Option<String>,
    #[serde(default)]
    pub scenario_id: i64,
    #[serde(default)]
    pub sub_scenario_id: i64,
}

impl Milestone {
    pub fn new(
        id: i64,
        name: &str,
        milestone_type: MilestoneType,
        age_at_occurrence: i32,
        amount: f64,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            parent_milestone_id: None,
            milestone_type,
            disbursement_type: None,
            age_at_occurrence,
            start_after_milestone: None,
            duration: None,
            duration_end_at_milestone: None,
            occurrence: Occurrence::Yearly,
            amount,
            payment: None,
            rate_of_return: None,
            rate_of_return_curve: None,
            scenario_id: 0,
            sub_scenario_id: 0,
        }
    }

    pub fn fixed_duration(mut self, years: u32) -> Self {
        self.disbursement_type = Some(DisbursementType::FixedDuration);
        self.duration = Some(years);
        self
    }

    pub fn perpetuity(mut self) -> Self {
        self.disbursement_type = Some(DisbursementType::Perpetuity);
        self.duration = None;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate_of_return = Some(rate);
        self
    }

    pub fn with_payment(mut self, payment: f64) -> Self {
        self.payment = Some(payment);
        self
    }

    pub fn monthly(mut self) -> Self {
        self.occurrence = Occurrence::Monthly;
        self
    }

    pub fn starts_after(mut self, name: &str) -> Self {
        self.start_after_milestone = Some(name.to_string());
        self
    }

    pub fn ends_at(mut self, name: &str) -> Self {
        self.duration_end_at_milestone = Some(name.to_string());
        self
    }

    pub fn in_scenario(mut self, scenario_id: i64, sub_scenario_id: i64) -> Self {
        self.scenario_id = scenario_id;
        self.sub_scenario_id = sub_scenario_id;
        self
    }

    pub fn with_parent(mut self, parent_milestone_id: i64) -> Self {
        self.parent_milestone_id = Some(parent_milestone_id);
        self
    }

    pub fn is_perpetuity(&self) -> bool {
        self.disbursement_type == Some(DisbursementType::Perpetuity)
    }

    pub fn is_monthly(&self) -> bool {
        self.occurrence == Occurrence::Monthly
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn is_inheritance(&self) -> bool {
        self.normalized_name() == "inheritance"
    }

    /// Current value of a numeric field; unset optionals read as zero.
    pub fn numeric_value(&self, parameter: ParameterName) -> Option<f64> {
        match parameter {
            ParameterName::Amount => Some(self.amount),
            ParameterName::AgeAtOccurrence => Some(self.age_at_occurrence as f64),
            ParameterName::Payment => Some(self.payment.unwrap_or(0.0)),
            ParameterName::Duration => Some(self.duration.unwrap_or(0) as f64),
            ParameterName::RateOfReturn => Some(self.rate_of_return.unwrap_or(0.0)),
            ParameterName::Occurrence | ParameterName::RateOfReturnCurve => None,
        }
    }

    /// Writes a numeric field. Ages and durations are rounded to whole values;
    /// ages outside `0..=MAX_AGE` and durations above `MAX_DURATION` are rejected.
    pub fn set_numeric(&mut self, parameter: ParameterName, value: f64) -> Result<(), ProjectionError> {
        let invalid = || ProjectionError::InvalidParameterValue {
            parameter,
            value: value.to_string(),
        };
        if !value.is_finite() {
            return Err(invalid());
        }
        let whole = if parameter.is_integral() {
            value.round()
        } else {
            value
        };
        match parameter {
            ParameterName::Amount => self.amount = value,
            ParameterName::AgeAtOccurrence => {
                if !(0.0..=f64::from(MAX_AGE)).contains(&whole) {
                    return Err(invalid());
                }
                self.age_at_occurrence = whole as i32;
            }
            ParameterName::Payment => self.payment = Some(value),
            ParameterName::Duration => {
                if whole > f64::from(MAX_DURATION) {
                    return Err(invalid());
                }
                self.duration = Some(whole.max(0.0) as u32);
            }
            ParameterName::RateOfReturn => self.rate_of_return = Some(value),
            ParameterName::Occurrence | ParameterName::RateOfReturnCurve => return Err(invalid()),
        }
        Ok(())
    }

    /// Apply a raw override string to the addressed field.
    pub fn apply_override(&mut self, parameter: ParameterName, raw: &str) -> Result<(), ProjectionError> {
        let invalid = || ProjectionError::InvalidParameterValue {
            parameter,
            value: raw.to_string(),
        };
        match parameter {
            ParameterName::Occurrence => {
                self.occurrence = raw.parse().map_err(|_| invalid())?;
                Ok(())
            }
            ParameterName::RateOfReturnCurve => {
                self.rate_of_return_curve = Some(raw.to_string());
                Ok(())
            }
            _ => {
                let value = parse_numeric(raw).ok_or_else(invalid)?;
                self.set_numeric(parameter, value)
            }
        }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}

pub fn parse_numeric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioParameterValue {
    pub milestone_id: i64,
    pub parameter: ParameterName,
    pub value: String,
}

impl ScenarioParameterValue {
    pub fn new(milestone_id: i64, parameter: ParameterName, value: &str) -> Self {
        Self {
            milestone_id,
            parameter,
            value: value.to_string(),
        }
    }

    pub fn numeric_value(&self) -> Option<f64> {
        parse_numeric(&self.value)
    }

    pub fn apply(&self, milestones: &mut [Milestone]) -> Result<(), ProjectionError> {
        let milestone = milestones
            .iter_mut()
            .find(|m| m.id == self.milestone_id)
            .ok_or(ProjectionError::UnknownMilestone(self.milestone_id))?;
        milestone.apply_override(self.parameter, &self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub milestone_id: i64,
    pub parameter: ParameterName,
    #[serde(default = "default_true")]
    pub is_goal: bool,
}

fn default_true() -> bool {
    true
}

impl Goal {
    pub fn new(milestone_id: i64, parameter: ParameterName) -> Self {
        Self {
            milestone_id,
            parameter,
            is_goal: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSubScenario {
    pub scenario_id: i64,
    pub sub_scenario_id: i64,
}

/// Everything one batch run reads. The caller owns loading and persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanInputs {
    pub milestones: Vec<Milestone>,
    pub scenario_parameter_values: Vec<ScenarioParameterValue>,
    pub goals: Vec<Goal>,
    pub target_sub_scenarios: Vec<TargetSubScenario>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumptions {
    pub inflation: f64,
    pub rate_of_return: f64,
    pub cost_of_debt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRow {
    pub age: i32,
    pub beginning_assets: f64,
    pub assets_income: f64,
    pub beginning_liabilities: f64,
    pub liabilities_expense: f64,
    pub salary: f64,
    pub expenses: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSummary {
    pub ending_assets: f64,
    pub ending_liabilities: f64,
    pub net_worth: f64,
}
