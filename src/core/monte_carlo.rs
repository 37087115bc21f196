use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::{ProjectionConfig, project};
use super::error::{MonteCarloError, ProjectionError};
use super::orchestrator::{Skipped, combinations};
use super::types::{
    MAX_AGE, MAX_DURATION, Milestone, ParameterName, PlanInputs, ProjectionRow,
    ScenarioParameterValue,
};

/// Trajectories are compared on their balance at this age when they reach it.
pub const BALANCE_AGE: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub iterations: u32,
    /// Standard deviation of the draws; `0.1 * |mean|` when unset.
    pub sigma: Option<f64>,
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            sigma: None,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub iteration: u32,
    pub sampled_value: f64,
    pub ending_balance: f64,
    pub rows: Vec<ProjectionRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub parameter: ParameterName,
    pub mean: f64,
    pub sigma: f64,
    pub iterations: u32,
    pub max: Trajectory,
    pub min: Trajectory,
}

pub fn simulate_milestones(
    milestones: &[Milestone],
    value: &ScenarioParameterValue,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, MonteCarloError> {
    simulate_with(milestones, value, config, &ProjectionConfig::default())
}

// Whole-valued fields are rounded and kept inside the range an override accepts.
fn clamp_draw(parameter: ParameterName, draw: f64) -> f64 {
    match parameter {
        ParameterName::AgeAtOccurrence => draw.round().clamp(0.0, f64::from(MAX_AGE)),
        ParameterName::Duration => draw.round().clamp(0.0, f64::from(MAX_DURATION)),
        _ => draw,
    }
}

pub fn simulate_with(
    milestones: &[Milestone],
    value: &ScenarioParameterValue,
    config: &MonteCarloConfig,
    projection: &ProjectionConfig,
) -> Result<MonteCarloResult, MonteCarloError> {
    let parameter = value.parameter;
    let mean = value
        .numeric_value()
        .filter(|_| parameter.is_numeric())
        .ok_or_else(|| MonteCarloError::NonNumeric {
            parameter,
            value: value.value.clone(),
        })?;
    let sigma = resolve_sigma(config, mean)?;
    let normal = Normal::new(mean, sigma)
        .map_err(|e| MonteCarloError::InvalidConfig(e.to_string()))?;
    let index = milestones
        .iter()
        .position(|m| m.id == value.milestone_id)
        .ok_or(ProjectionError::UnknownMilestone(value.milestone_id))?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut max: Option<Trajectory> = None;
    let mut min: Option<Trajectory> = None;

    for iteration in 0..config.iterations {
        let draw = clamp_draw(parameter, normal.sample(&mut rng));
        let mut set = milestones.to_vec();
        set[index].set_numeric(parameter, draw)?;
        let projected = project(&set, projection)?;
        let ending_balance = projected.anchor_balance(Some(BALANCE_AGE));

        let beats_max = max.as_ref().is_none_or(|m| ending_balance > m.ending_balance);
        let beats_min = min.as_ref().is_none_or(|m| ending_balance < m.ending_balance);
        if !(beats_max || beats_min) {
            continue;
        }
        let trajectory = Trajectory {
            iteration,
            sampled_value: draw,
            ending_balance,
            rows: projected.into_rows(),
        };
        match (beats_max, beats_min) {
            (true, true) => {
                max = Some(trajectory.clone());
                min = Some(trajectory);
            }
            (true, false) => max = Some(trajectory),
            _ => min = Some(trajectory),
        }
    }

    match (max, min) {
        (Some(max), Some(min)) => {
            debug!(
                %parameter,
                best = max.ending_balance,
                worst = min.ending_balance,
                "monte carlo sampling finished"
            );
            Ok(MonteCarloResult {
                parameter,
                mean,
                sigma,
                iterations: config.iterations,
                max,
                min,
            })
        }
        _ => Err(MonteCarloError::InvalidConfig(
            "iterations must be > 0".to_string(),
        )),
    }
}

fn resolve_sigma(config: &MonteCarloConfig, mean: f64) -> Result<f64, MonteCarloError> {
    if config.iterations == 0 {
        return Err(MonteCarloError::InvalidConfig(
            "iterations must be > 0".to_string(),
        ));
    }
    let sigma = match config.sigma {
        Some(sigma) => sigma,
        None if mean == 0.0 => 0.01,
        None => 0.1 * mean.abs(),
    };
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(MonteCarloError::InvalidConfig(
            "sigma must be finite and >= 0".to_string(),
        ));
    }
    Ok(sigma)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloRun {
    pub scenario_id: i64,
    pub sub_scenario_id: i64,
    pub milestone_id: i64,
    pub parameter: ParameterName,
    pub value: String,
    pub max: Trajectory,
    pub min: Trajectory,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloReport {
    pub runs: Vec<MonteCarloRun>,
    pub skipped: Vec<Skipped>,
}

pub struct MonteCarloRunner {
    config: MonteCarloConfig,
    projection: ProjectionConfig,
}

impl MonteCarloRunner {
    pub fn new(config: MonteCarloConfig, projection: ProjectionConfig) -> Self {
        Self { config, projection }
    }

    /// Samples every scenario override against the milestones of its own
    /// combination. Overrides that cannot be sampled are skipped.
    pub fn run(&self, inputs: &PlanInputs) -> Result<MonteCarloReport, MonteCarloError> {
        resolve_sigma(&self.config, 1.0)?;
        let grouped = combinations(&inputs.milestones);
        let mut report = MonteCarloReport::default();

        for value in &inputs.scenario_parameter_values {
            let Some(owner) = inputs.milestones.iter().find(|m| m.id == value.milestone_id)
            else {
                warn!(
                    milestone_id = value.milestone_id,
                    "scenario value references unknown milestone; skipping"
                );
                continue;
            };
            let combination = (owner.scenario_id, owner.sub_scenario_id);
            let Some(milestones) = grouped.get(&combination) else {
                continue;
            };

            match simulate_with(milestones, value, &self.config, &self.projection) {
                Ok(result) => report.runs.push(MonteCarloRun {
                    scenario_id: combination.0,
                    sub_scenario_id: combination.1,
                    milestone_id: value.milestone_id,
                    parameter: value.parameter,
                    value: value.value.clone(),
                    max: result.max,
                    min: result.min,
                }),
                Err(MonteCarloError::InvalidConfig(reason)) => {
                    return Err(MonteCarloError::InvalidConfig(reason));
                }
                Err(e) => {
                    report
                        .skipped
                        .push(Skipped::new(combination, Some(value.milestone_id), e.to_string()));
                }
            }
        }

        info!(
            runs = report.runs.len(),
            skipped = report.skipped.len(),
            iterations = self.config.iterations,
            "monte carlo batch complete"
        );
        Ok(report)
    }
}
