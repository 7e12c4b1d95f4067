#![deny(warnings)]

//! Scenario orchestration: the iteration and time-step loop that balances
//! commodity supply against demand across a project population.
//!
//! Each simulated year runs a fixed phase order:
//! 1. apply scheduled overrides to projects and factor rows
//! 2. background greenfield discovery
//! 3. project ranking (ascending value; active first in priority mode)
//! 4. demand dispatch per balanced commodity over the ranked list
//! 5. greenfield-on-demand generation, bounded by the attempt cap
//! 6. demand carry-over into the next year
//! 7. Produced -> Active status reset
//! 8. brownfield expansion for active projects
//!
//! Scenarios are independent: every worker owns fresh state cloned from an
//! immutable scenario template, so the pool shares nothing mutable.

pub mod stats;

pub use stats::{fold_statistics, StatKey, Statistic, StatsTable};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use sim_core::{
    validate_params, validate_project, DemandLedger, FactorTable, Project, ProjectId,
    ProjectStatus, ScheduledOverride, SimParams, SupplyOutcome, ValidationError, ValueGating, Year,
};
use sim_econ::{refresh_project_value, resource_discovery, DiscoveryKind};

/// Immutable scenario template; every iteration clones fresh owned state
/// from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub params: SimParams,
    pub factors: FactorTable,
    pub demand: DemandLedger,
    pub projects: Vec<Project>,
    pub overrides: Vec<ScheduledOverride>,
}

/// Final population and folded statistics for one iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IterationResult {
    pub scenario: String,
    pub iteration: u32,
    /// The full population, including generated and depleted projects.
    pub projects: Vec<Project>,
    pub stats: StatsTable,
}

/// Scenario-level failures, surfaced per task rather than thrown at join.
#[derive(Debug, Error)]
pub enum RunError {
    /// A template failed validation before the run started.
    #[error("scenario {scenario}: {source}")]
    InvalidTemplate {
        scenario: String,
        #[source]
        source: ValidationError,
    },
    /// Greenfield generation was enabled with an empty factor table.
    #[error("scenario {scenario}: greenfield generation enabled with an empty factor table")]
    NoFactors { scenario: String },
}

/// Run every scenario on a worker pool sized available parallelism − 1.
///
/// Each task yields its own result slot; a failing scenario neither
/// cancels nor masks its siblings.
pub fn run_scenarios(scenarios: &[Scenario]) -> Vec<Result<Vec<IterationResult>, RunError>> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1);
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| scenarios.par_iter().map(run_scenario).collect()),
        Err(err) => {
            warn!(%err, "worker pool unavailable; running scenarios sequentially");
            scenarios.iter().map(run_scenario).collect()
        }
    }
}

/// Run all iterations of one scenario, sequentially and deterministically.
pub fn run_scenario(scenario: &Scenario) -> Result<Vec<IterationResult>, RunError> {
    validate_scenario(scenario)?;
    info!(
        scenario = %scenario.name,
        iterations = scenario.params.iterations,
        "scenario start"
    );
    let mut results = Vec::with_capacity(scenario.params.iterations as usize);
    for iteration in 0..scenario.params.iterations {
        results.push(run_iteration(scenario, iteration));
    }
    Ok(results)
}

fn validate_scenario(scenario: &Scenario) -> Result<(), RunError> {
    validate_params(&scenario.params).map_err(|source| RunError::InvalidTemplate {
        scenario: scenario.name.clone(),
        source,
    })?;
    for project in &scenario.projects {
        validate_project(project).map_err(|source| RunError::InvalidTemplate {
            scenario: scenario.name.clone(),
            source,
        })?;
    }
    if (scenario.params.background_greenfield || scenario.params.demanded_greenfield)
        && scenario.factors.is_empty()
    {
        return Err(RunError::NoFactors {
            scenario: scenario.name.clone(),
        });
    }
    Ok(())
}

fn run_iteration(scenario: &Scenario, iteration: u32) -> IterationResult {
    let params = &scenario.params;
    // Fresh owned state from the immutable template.
    let mut factors = scenario.factors.clone();
    let mut demand = scenario.demand.clone();
    let mut projects = scenario.projects.clone();

    // One ChaCha stream per iteration keeps results reproducible no
    // matter how scenarios are scheduled across workers.
    let mut rng = ChaCha8Rng::seed_from_u64(params.rng_seed);
    rng.set_stream(u64::from(iteration));

    let mut next_id = projects.iter().map(|p| p.id.0 + 1).max().unwrap_or(0);
    let gating = if params.marginal_value_gating {
        ValueGating::MarginalTranche
    } else {
        ValueGating::Aggregate
    };

    for year in params.start_year..=params.end_year {
        apply_overrides(&scenario.overrides, year, &mut projects, &mut factors);

        if params.background_greenfield {
            for _ in 0..params.background_per_year {
                match resource_discovery(
                    &mut rng,
                    &factors,
                    year,
                    DiscoveryKind::Background,
                    ProjectId(next_id),
                ) {
                    Ok(project) => {
                        next_id += 1;
                        projects.push(project);
                    }
                    Err(err) => {
                        warn!(%err, year, "background discovery skipped");
                        break;
                    }
                }
            }
        }

        rank_projects(&mut projects, params.priority_active);

        dispatch_demand(
            &mut rng,
            &mut projects,
            &mut demand,
            &factors,
            year,
            params,
            gating,
            &mut next_id,
        );

        demand.apply_carry_over(year, params.end_year);

        for project in projects.iter_mut() {
            project.reset_period_status();
        }

        if params.brownfield {
            for project in projects
                .iter_mut()
                .filter(|p| p.status == ProjectStatus::Active)
            {
                project.expand_resource(year);
                if params.reprice_each_period {
                    refresh_project_value(project);
                }
            }
        }
        debug!(year, projects = projects.len(), "year complete");
    }

    let stats = fold_statistics(&projects);
    IterationResult {
        scenario: scenario.name.clone(),
        iteration,
        projects,
        stats,
    }
}

/// Ascending aggregate value; in priority mode active projects come
/// first. The sort is stable, so equal-value projects keep their order.
fn rank_projects(projects: &mut [Project], priority_active: bool) {
    if priority_active {
        projects.sort_by_key(|p| (p.status != ProjectStatus::Active, p.value.aggregate));
    } else {
        projects.sort_by_key(|p| p.value.aggregate);
    }
}

fn apply_overrides(
    overrides: &[ScheduledOverride],
    year: Year,
    projects: &mut [Project],
    factors: &mut FactorTable,
) {
    for ov in overrides.iter().filter(|ov| ov.year == year) {
        for project in projects
            .iter_mut()
            .filter(|p| p.region == ov.region && p.deposit_type == ov.deposit_type)
        {
            project.apply_override(&ov.field, ov.value);
        }
        factors.apply_override(ov);
    }
}

/// Phases 4 and 5: walk the ranked list once per balanced commodity, then
/// let unmet demand call new deposits into existence, bounded by the
/// attempt cap so an unsatisfiable commodity cannot spin a worker forever.
#[allow(clippy::too_many_arguments)]
fn dispatch_demand(
    rng: &mut ChaCha8Rng,
    projects: &mut Vec<Project>,
    demand: &mut DemandLedger,
    factors: &FactorTable,
    year: Year,
    params: &SimParams,
    gating: ValueGating,
    next_id: &mut u32,
) {
    for commodity in demand.balanced_commodities() {
        let (threshold, recovery) = match demand.get(&commodity) {
            Some(entry) => (entry.threshold, entry.intermediate_recovery),
            None => continue,
        };
        if recovery <= 0.0 {
            warn!(
                commodity = %commodity.0,
                "non-positive intermediate recovery; dispatch skipped"
            );
            continue;
        }

        for idx in 0..projects.len() {
            let residual = demand.residual(&commodity, year);
            if residual <= threshold {
                break;
            }
            let slice = residual / recovery;
            if let SupplyOutcome::Supplied { intermediate, .. } =
                projects[idx].supply(rng, slice, year, &commodity, gating)
            {
                if intermediate > 0.0 {
                    demand.record_supply(&commodity, year, intermediate);
                }
            }
        }

        if params.demanded_greenfield {
            let mut attempts = 0;
            while demand.residual(&commodity, year) > threshold {
                if attempts >= params.demand_discovery_cap {
                    warn!(
                        commodity = %commodity.0,
                        year,
                        cap = params.demand_discovery_cap,
                        "demand discovery cap reached with unmet demand"
                    );
                    break;
                }
                attempts += 1;
                match resource_discovery(
                    rng,
                    factors,
                    year,
                    DiscoveryKind::Demanded,
                    ProjectId(*next_id),
                ) {
                    Ok(mut project) => {
                        *next_id += 1;
                        let residual = demand.residual(&commodity, year);
                        let slice = residual / recovery;
                        if let SupplyOutcome::Supplied { intermediate, .. } =
                            project.supply(rng, slice, year, &commodity, gating)
                        {
                            if intermediate > 0.0 {
                                demand.record_supply(&commodity, year, intermediate);
                            }
                        }
                        projects.push(project);
                    }
                    Err(err) => {
                        warn!(%err, year, "demand discovery failed");
                        break;
                    }
                }
            }
        }
    }
}
