#![deny(warnings)]

//! Core domain models and invariants for the mineral supply forecaster.
//!
//! This crate defines the project (deposit) entity with its lifecycle state
//! machine and tranche-constrained supply dispatch, the per-commodity demand
//! ledger, the distribution-factor tables that parametrize stochastic
//! generation, and the wildcard group keys used to aggregate results.

pub mod demand;
pub mod factors;
pub mod key;
pub mod project;

pub use demand::{DemandEntry, DemandLedger};
pub use factors::{
    CapacityLaw, CoProduct, FactorRow, FactorTable, OverrideField, SampleModel, ScheduledOverride,
    ValueSpec, ValueTerm,
};
pub use key::{Dim, GroupKey};
pub use project::{
    validate_project, CommodityState, NetValue, Origin, Project, ProjectId, ProjectSpec,
    ProjectStatus, SupplyOutcome, ValueGating,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Simulation year. The engine is year-indexed; there are no calendar dates.
pub type Year = i32;

/// Commodity symbol, e.g. "Cu", "Ni", "Li".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commodity(pub String);

impl Commodity {
    /// Convenience constructor from a string slice.
    pub fn new(symbol: &str) -> Self {
        Commodity(symbol.to_string())
    }
}

/// Mining region identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Region(pub String);

/// Deposit type identifier, e.g. "porphyry", "laterite".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepositType(pub String);

/// Per-scenario run parameters and feature toggles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    /// First simulated year, inclusive.
    pub start_year: Year,
    /// Last simulated year, inclusive.
    pub end_year: Year,
    /// Stochastic iterations per scenario.
    pub iterations: u32,
    /// Scenario-level seed; iterations derive independent streams from it.
    pub rng_seed: u64,
    /// Generate scheduled background discoveries each year.
    pub background_greenfield: bool,
    /// Background discoveries per year when enabled.
    pub background_per_year: u32,
    /// Generate discoveries in response to unmet demand.
    pub demanded_greenfield: bool,
    /// Upper bound on demand-triggered discoveries per commodity per year.
    pub demand_discovery_cap: u32,
    /// Run brownfield expansion for active projects each year.
    pub brownfield: bool,
    /// Refresh net values after each brownfield expansion.
    pub reprice_each_period: bool,
    /// Rank active projects ahead of the rest when dispatching.
    pub priority_active: bool,
    /// Gate co-product recovery on marginal tranche value instead of the
    /// commodity aggregate.
    pub marginal_value_gating: bool,
}

impl Default for SimParams {
    fn default() -> Self {
        SimParams {
            start_year: 2025,
            end_year: 2050,
            iterations: 1,
            rng_seed: 42,
            background_greenfield: false,
            background_per_year: 0,
            demanded_greenfield: false,
            demand_discovery_cap: 1000,
            brownfield: false,
            reprice_each_period: false,
            priority_active: true,
            marginal_value_gating: false,
        }
    }
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Tranche sequences must stay parallel across resource and grades.
    #[error("project {0}: tranche count mismatch for commodity {1}")]
    TrancheMismatch(u32, String),
    /// Recovery must be within [0, 1].
    #[error("recovery must be within [0,1]")]
    InvalidRecovery,
    /// Probability must be within [0, 1].
    #[error("probability must be within [0,1]")]
    InvalidProbability,
    /// Resource masses must be finite and non-negative.
    #[error("negative or non-finite resource mass")]
    InvalidResource,
    /// Production capacity must be strictly positive.
    #[error("production capacity must be > 0")]
    NonPositiveCapacity,
    /// Fractions (expansion, carry-over) must be finite and non-negative.
    #[error("fraction must be finite and non-negative")]
    InvalidFraction,
    /// Year range is empty or reversed.
    #[error("year range {0}..={1} is empty")]
    EmptyYearRange(Year, Year),
}

/// Validate scenario parameters.
pub fn validate_params(p: &SimParams) -> Result<(), ValidationError> {
    if p.start_year > p.end_year {
        return Err(ValidationError::EmptyYearRange(p.start_year, p.end_year));
    }
    Ok(())
}
