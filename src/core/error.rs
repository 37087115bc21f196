use thiserror::Error;

use super::types::ParameterName;

/// Failures raised while turning a milestone set into a projection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProjectionError {
    #[error("no milestones supplied; cannot derive a projection horizon")]
    EmptyMilestones,
    #[error("milestone '{milestone}' references unknown milestone '{reference}'")]
    UnresolvedReference { milestone: String, reference: String },
    #[error("cyclic milestone reference through '{milestone}'")]
    CyclicReference { milestone: String },
    #[error("unknown scenario parameter '{0}'")]
    UnknownParameter(String),
    #[error("invalid value '{value}' for parameter {parameter}")]
    InvalidParameterValue {
        parameter: ParameterName,
        value: String,
    },
    #[error("milestone {0} not found")]
    UnknownMilestone(i64),
    #[error("projection horizon {start_age}..={end_age} is outside 0..={max}", max = super::engine::MAX_PROJECTION_AGE)]
    HorizonOutOfRange { start_age: i32, end_age: i32 },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolverError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("goal parameter {0} is not numeric and cannot be solved")]
    NonNumericGoal(ParameterName),
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MonteCarloError {
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("Monte Carlo only supports numeric scenario parameters ({parameter}='{value}')")]
    NonNumeric {
        parameter: ParameterName,
        value: String,
    },
    #[error("invalid Monte Carlo configuration: {0}")]
    InvalidConfig(String),
}
