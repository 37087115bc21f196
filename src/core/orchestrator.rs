use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use super::engine::{Projection, ProjectionConfig, project};
use super::error::{ProjectionError, SolverError};
use super::solver::{Anchor, GoalSolver, SolveStatus, SolverConfig};
use super::types::{
    Goal, Milestone, ParameterName, PlanInputs, ProjectionRow, ProjectionSummary,
    ScenarioParameterValue,
};

/// `(scenario_id, sub_scenario_id)`.
pub type Combination = (i64, i64);

/// Milestones grouped by the combination they belong to, in ascending order.
pub fn combinations(milestones: &[Milestone]) -> BTreeMap<Combination, Vec<Milestone>> {
    let mut grouped: BTreeMap<Combination, Vec<Milestone>> = BTreeMap::new();
    for milestone in milestones {
        grouped
            .entry((milestone.scenario_id, milestone.sub_scenario_id))
            .or_default()
            .push(milestone.clone());
    }
    grouped
}

/// Inheritance milestone age of a set, used as the anchor age.
pub fn inheritance_age(milestones: &[Milestone]) -> Option<i32> {
    milestones
        .iter()
        .find(|m| m.is_inheritance())
        .map(|m| m.age_at_occurrence)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Skipped {
    pub scenario_id: i64,
    pub sub_scenario_id: i64,
    pub milestone_id: Option<i64>,
    pub reason: String,
}

impl Skipped {
    pub(crate) fn new(combination: Combination, milestone_id: Option<i64>, reason: String) -> Self {
        warn!(
            scenario_id = combination.0,
            sub_scenario_id = combination.1,
            ?milestone_id,
            %reason,
            "skipping"
        );
        Self {
            scenario_id: combination.0,
            sub_scenario_id: combination.1,
            milestone_id,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRun {
    pub scenario_id: i64,
    pub sub_scenario_id: i64,
    pub summary: ProjectionSummary,
    pub rows: Vec<ProjectionRow>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineReport {
    pub runs: Vec<BaselineRun>,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolvedRun {
    pub scenario_id: i64,
    pub sub_scenario_id: i64,
    pub milestone_id: i64,
    pub parameter: ParameterName,
    #[serde(rename = "override")]
    pub scenario_value: ScenarioParameterValue,
    pub solved_value: f64,
    pub status: SolveStatus,
    pub converged: bool,
    pub message: String,
    pub anchor: Option<Anchor>,
    pub achieved_balance: f64,
    pub rows: Vec<ProjectionRow>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveReport {
    pub runs: Vec<SolvedRun>,
    pub skipped: Vec<Skipped>,
}

pub struct Orchestrator {
    inputs: PlanInputs,
    projection: ProjectionConfig,
    solver: SolverConfig,
}

impl Orchestrator {
    pub fn new(inputs: PlanInputs, projection: ProjectionConfig, solver: SolverConfig) -> Self {
        Self {
            inputs,
            projection,
            solver,
        }
    }

    pub fn project_baselines(&self) -> BaselineReport {
        let mut report = BaselineReport::default();
        for (combination, milestones) in combinations(&self.inputs.milestones) {
            match project(&milestones, &self.projection) {
                Ok(projection) => report.runs.push(BaselineRun {
                    scenario_id: combination.0,
                    sub_scenario_id: combination.1,
                    summary: projection.summary(),
                    rows: projection.into_rows(),
                }),
                Err(e) => report
                    .skipped
                    .push(Skipped::new(combination, None, e.to_string())),
            }
        }
        info!(
            runs = report.runs.len(),
            skipped = report.skipped.len(),
            "baseline projections complete"
        );
        report
    }

    pub fn solve_all(&self) -> SolveReport {
        let grouped = combinations(&self.inputs.milestones);
        let targets: HashMap<i64, i64> = self
            .inputs
            .target_sub_scenarios
            .iter()
            .map(|t| (t.scenario_id, t.sub_scenario_id))
            .collect();
        let mut anchors: HashMap<(i64, i64, ParameterName, String), Anchor> = HashMap::new();
        let mut report = SolveReport::default();

        for (&combination, milestones) in &grouped {
            let goals: Vec<&Goal> = self
                .inputs
                .goals
                .iter()
                .filter(|g| g.is_goal && milestones.iter().any(|m| m.id == g.milestone_id))
                .collect();
            let values: Vec<&ScenarioParameterValue> = self
                .inputs
                .scenario_parameter_values
                .iter()
                .filter(|v| milestones.iter().any(|m| m.id == v.milestone_id))
                .collect();
            if goals.is_empty() || values.is_empty() {
                continue;
            }

            let (scenario_id, sub_scenario_id) = combination;
            let target_set = match targets.get(&scenario_id) {
                None => None,
                Some(&target_sub) => match grouped.get(&(scenario_id, target_sub)) {
                    Some(set) => Some((target_sub, set)),
                    None => {
                        report.skipped.push(Skipped::new(
                            combination,
                            None,
                            format!(
                                "target sub-scenario {target_sub} of scenario {scenario_id} has no milestones"
                            ),
                        ));
                        continue;
                    }
                },
            };

            match target_set {
                Some((target_sub, _)) if target_sub == sub_scenario_id => {
                    for value in &values {
                        for goal in &goals {
                            match self.target_defined(combination, milestones, goal, value) {
                                Ok(run) => report.runs.push(run),
                                Err(e) => report.skipped.push(Skipped::new(
                                    combination,
                                    Some(goal.milestone_id),
                                    e.to_string(),
                                )),
                            }
                        }
                    }
                }
                Some((_, target_milestones)) => {
                    for value in &values {
                        let anchor = match self.cached_anchor(
                            &mut anchors,
                            scenario_id,
                            milestones,
                            target_milestones,
                            value,
                        ) {
                            Ok(anchor) => anchor,
                            Err(reason) => {
                                report.skipped.push(Skipped::new(
                                    combination,
                                    Some(value.milestone_id),
                                    reason,
                                ));
                                continue;
                            }
                        };
                        for goal in &goals {
                            self.solve_one(&mut report, combination, milestones, anchor, goal, value);
                        }
                    }
                }
                None => {
                    let anchor = match self.baseline_anchor(milestones) {
                        Ok(anchor) => anchor,
                        Err(e) => {
                            report
                                .skipped
                                .push(Skipped::new(combination, None, e.to_string()));
                            continue;
                        }
                    };
                    for value in &values {
                        for goal in &goals {
                            self.solve_one(&mut report, combination, milestones, anchor, goal, value);
                        }
                    }
                }
            }
        }

        info!(
            runs = report.runs.len(),
            skipped = report.skipped.len(),
            "goal solving complete"
        );
        report
    }

    fn solve_one(
        &self,
        report: &mut SolveReport,
        combination: Combination,
        milestones: &[Milestone],
        anchor: Anchor,
        goal: &Goal,
        value: &ScenarioParameterValue,
    ) {
        let solved = GoalSolver::new(milestones, anchor, self.solver)
            .with_projection(self.projection)
            .solve(goal, value);
        match solved {
            Ok(result) => report.runs.push(SolvedRun {
                scenario_id: combination.0,
                sub_scenario_id: combination.1,
                milestone_id: goal.milestone_id,
                parameter: goal.parameter,
                scenario_value: value.clone(),
                solved_value: result.solved_value,
                status: result.status,
                converged: result.converged,
                message: result.message,
                anchor: Some(anchor),
                achieved_balance: result.achieved_balance,
                rows: result.projection.into_rows(),
            }),
            Err(e) => report.skipped.push(Skipped::new(
                combination,
                Some(goal.milestone_id),
                e.to_string(),
            )),
        }
    }

    fn target_defined(
        &self,
        combination: Combination,
        milestones: &[Milestone],
        goal: &Goal,
        value: &ScenarioParameterValue,
    ) -> Result<SolvedRun, SolverError> {
        let mut set = milestones.to_vec();
        value.apply(&mut set)?;
        let solved_value = set
            .iter()
            .find(|m| m.id == goal.milestone_id)
            .ok_or(ProjectionError::UnknownMilestone(goal.milestone_id))?
            .numeric_value(goal.parameter)
            .ok_or(SolverError::NonNumericGoal(goal.parameter))?;
        let projection = project(&set, &self.projection)?;
        Ok(SolvedRun {
            scenario_id: combination.0,
            sub_scenario_id: combination.1,
            milestone_id: goal.milestone_id,
            parameter: goal.parameter,
            scenario_value: value.clone(),
            solved_value,
            status: SolveStatus::TargetDefined,
            converged: true,
            message: "Value defined by the target sub-scenario.".to_string(),
            anchor: None,
            achieved_balance: projection.anchor_balance(inheritance_age(&set)),
            rows: projection.into_rows(),
        })
    }

    fn cached_anchor(
        &self,
        cache: &mut HashMap<(i64, i64, ParameterName, String), Anchor>,
        scenario_id: i64,
        milestones: &[Milestone],
        target_milestones: &[Milestone],
        value: &ScenarioParameterValue,
    ) -> Result<Anchor, String> {
        let source = milestones
            .iter()
            .find(|m| m.id == value.milestone_id)
            .ok_or_else(|| ProjectionError::UnknownMilestone(value.milestone_id).to_string())?;
        let counterpart = counterpart(source, target_milestones).ok_or_else(|| {
            format!(
                "milestone '{}' has no counterpart in the target sub-scenario",
                source.name
            )
        })?;

        let key = (
            scenario_id,
            counterpart.id,
            value.parameter,
            value.value.clone(),
        );
        if let Some(anchor) = cache.get(&key) {
            return Ok(*anchor);
        }

        let mut set = target_milestones.to_vec();
        ScenarioParameterValue::new(counterpart.id, value.parameter, &value.value)
            .apply(&mut set)
            .map_err(|e| e.to_string())?;
        let projection = project(&set, &self.projection).map_err(|e| e.to_string())?;
        let anchor = anchor_from(&projection, inheritance_age(&set));
        cache.insert(key, anchor);
        Ok(anchor)
    }

    fn baseline_anchor(&self, milestones: &[Milestone]) -> Result<Anchor, ProjectionError> {
        let projection = project(milestones, &self.projection)?;
        Ok(anchor_from(&projection, inheritance_age(milestones)))
    }
}

fn anchor_from(projection: &Projection, age: Option<i32>) -> Anchor {
    Anchor {
        balance: projection.anchor_balance(age),
        age,
    }
}

/// The milestone in `target` standing in for `source`: same parent first, then
/// same normalized name and type.
fn counterpart<'t>(source: &Milestone, target: &'t [Milestone]) -> Option<&'t Milestone> {
    if let Some(parent) = source.parent_milestone_id {
        let by_parent = target
            .iter()
            .find(|m| m.parent_milestone_id == Some(parent) || m.id == parent);
        if by_parent.is_some() {
            return by_parent;
        }
    }
    let name = source.normalized_name();
    target
        .iter()
        .find(|m| m.milestone_type == source.milestone_type && m.normalized_name() == name)
}
