mod cashflow;
mod engine;
mod error;
mod monte_carlo;
mod orchestrator;
mod resolver;
mod solver;
mod types;

pub use cashflow::{AmortisingLoan, GrowingSeries, LoanTerm, compound};
pub use engine::{
    DEFAULT_ASSET_RETURN, DEFAULT_COST_OF_DEBT, DEFAULT_INFLATION, DcfModel, MAX_PROJECTION_AGE,
    Projection, ProjectionConfig, project,
};
pub use error::{MonteCarloError, ProjectionError, SolverError};
pub use monte_carlo::{
    MonteCarloConfig, MonteCarloReport, MonteCarloResult, MonteCarloRun, MonteCarloRunner,
    Trajectory, simulate_milestones, simulate_with,
};
pub use orchestrator::{
    BaselineReport, BaselineRun, Combination, Orchestrator, Skipped, SolveReport, SolvedRun,
    combinations, inheritance_age,
};
pub use resolver::{CyclePolicy, Resolution, resolve};
pub use solver::{Anchor, GoalSolveResult, GoalSolver, SolveStatus, SolveStep, SolverConfig};
pub use types::{
    Assumptions, DisbursementType, Goal, MAX_AGE, MAX_DURATION, Milestone, MilestoneType,
    Occurrence, ParameterName, PlanInputs, ProjectionRow, ProjectionSummary,
    ScenarioParameterValue, TargetSubScenario, normalize_name,
};
