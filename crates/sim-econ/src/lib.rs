#![deny(warnings)]

//! Economic models and stochastic generators for the supply forecaster.
//!
//! This crate provides:
//! - Net-value computation from revenue/cost term families
//! - Grade, tonnage, and capacity sampling with clamp-style truncation
//! - The `resource_discovery` factory that assembles new projects

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::{LogNormal, Normal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use sim_core::{
    CapacityLaw, CommodityState, FactorTable, NetValue, Origin, Project, ProjectId, ProjectSpec,
    ProjectStatus, SampleModel, ValidationError, ValueSpec, ValueTerm, Year,
};

/// Errors produced by generation helpers.
#[derive(Debug, Error, PartialEq)]
pub enum GenError {
    /// The factor table has no usable row to sample from.
    #[error("no deposit type available for discovery")]
    NoDepositType,
    /// A generated project failed structural validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Whether a discovery is scheduled background exploration or a response
/// to unmet demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryKind {
    /// Scheduled exploration; production starts after the development period.
    Background,
    /// Demand-triggered; discovery is backdated so supply can start now.
    Demanded,
}

/// Draw a grade from a sample model.
///
/// `reference` supplies the grade a `Multiple` model scales from.
/// Degenerate parameters are logged and yield 0.0; callers must guard.
pub fn grade_generate<R: Rng>(rng: &mut R, model: &SampleModel, reference: Option<f64>) -> f64 {
    match model {
        SampleModel::Fixed { value } => value.max(0.0),
        SampleModel::Multiple { of, factor } => match reference {
            Some(g) => (g * factor).max(0.0),
            None => {
                warn!(of = %of.0, "multiple-of model without a reference grade");
                0.0
            }
        },
        SampleModel::LogNormal { mu, sigma, cap } => lognormal_clamped(rng, *mu, *sigma, *cap),
    }
}

/// Draw a tonnage. A `Multiple` model links tonnage to the referenced
/// commodity's freshly drawn grade.
pub fn tonnage_generate<R: Rng>(rng: &mut R, model: &SampleModel, grade: Option<f64>) -> f64 {
    grade_generate(rng, model, grade)
}

/// Log-normal draw truncated from above. The clamp is a clamp, not a
/// resample: out-of-range draws map onto the cap itself.
fn lognormal_clamped<R: Rng>(rng: &mut R, mu: f64, sigma: f64, cap: f64) -> f64 {
    match LogNormal::new(mu, sigma) {
        Ok(dist) => {
            let draw = dist.sample(rng);
            if cap > 0.0 {
                draw.min(cap)
            } else {
                draw
            }
        }
        Err(_) => {
            warn!(mu, sigma, "degenerate log-normal parameters; yielding 0");
            0.0
        }
    }
}

/// Sample production capacity around the allometric law
/// `coeff * tonnage^exponent`, then clamp the implied mine life into
/// `[min_life, max_life]` by recomputing capacity from the violated bound.
pub fn capacity_generate<R: Rng>(rng: &mut R, law: &CapacityLaw, tonnage: f64) -> f64 {
    if tonnage <= 0.0 || law.coeff <= 0.0 {
        warn!(
            tonnage,
            coeff = law.coeff,
            "degenerate capacity inputs; yielding 0"
        );
        return 0.0;
    }
    let mean = law.coeff * tonnage.powf(law.exponent);
    let sd = (law.spread * mean).abs();
    let mut capacity = if sd > 0.0 {
        match Normal::new(mean, sd) {
            Ok(dist) => dist.sample(rng),
            Err(_) => mean,
        }
    } else {
        mean
    };
    if capacity <= 0.0 {
        capacity = mean;
    }
    let life = tonnage / capacity;
    if law.min_life > 0.0 && life < law.min_life {
        capacity = tonnage / law.min_life;
    } else if law.max_life > 0.0 && life > law.max_life {
        capacity = tonnage / law.max_life;
    }
    capacity
}

/// Evaluate one signed value term against an (ore tonnage, grade) slice.
fn term_contribution(term: &ValueTerm, tonnage: f64, grade: f64) -> f64 {
    match term {
        ValueTerm::Fixed { amount } => *amount,
        ValueTerm::PerTonne { rate } => rate * tonnage,
        ValueTerm::GradeScaled { rate } => rate * grade,
        ValueTerm::PerContainedTonne { rate } => rate * tonnage * grade,
    }
}

/// Net value of one (tonnage, grade) slice: revenue minus cost.
pub fn slice_value(spec: &ValueSpec, tonnage: f64, grade: f64) -> f64 {
    let revenue: f64 = spec
        .revenue
        .iter()
        .map(|t| term_contribution(t, tonnage, grade))
        .sum();
    let cost: f64 = spec
        .cost
        .iter()
        .map(|t| term_contribution(t, tonnage, grade))
        .sum();
    revenue - cost
}

/// Per-tranche and aggregate net value of one commodity.
///
/// Per-tranche values are evaluated on each tranche's (ore, grade); the
/// aggregate is evaluated on total ore and the resource-weighted mean
/// grade, so fixed terms count once rather than once per tranche.
pub fn value_generate(spec: &ValueSpec, remaining: &[f64], grades: &[f64]) -> NetValue {
    let by_tranche: Vec<Decimal> = remaining
        .iter()
        .zip(grades)
        .map(|(&ore, &grade)| to_money(slice_value(spec, ore, grade)))
        .collect();
    let total: f64 = remaining.iter().sum();
    let mean_grade = if total > 0.0 {
        remaining
            .iter()
            .zip(grades)
            .map(|(ore, grade)| ore * grade)
            .sum::<f64>()
            / total
    } else {
        0.0
    };
    NetValue {
        aggregate: to_money(slice_value(spec, total, mean_grade)),
        by_tranche,
    }
}

/// Recompute every commodity's net value and the project aggregate from
/// the current tranches. Mine-level cost terms enter the aggregate only;
/// per-tranche project values are the sums over commodities.
pub fn refresh_project_value(project: &mut Project) {
    let remaining = project.remaining.clone();
    let mut aggregate = Decimal::ZERO;
    let mut by_tranche = vec![Decimal::ZERO; remaining.len()];
    for st in project.commodities.values_mut() {
        let value = value_generate(&st.value_spec, &remaining, &st.grades);
        aggregate += value.aggregate;
        for (acc, v) in by_tranche.iter_mut().zip(&value.by_tranche) {
            *acc += *v;
        }
        st.value = value;
    }
    let total: f64 = remaining.iter().sum();
    let mine_cost: f64 = project
        .mine_costs
        .iter()
        .map(|t| term_contribution(t, total, 0.0))
        .sum();
    aggregate -= to_money(mine_cost);
    project.value = NetValue {
        aggregate,
        by_tranche,
    };
}

fn to_money(value: f64) -> Decimal {
    match Decimal::from_f64(value) {
        Some(d) => d,
        None => {
            warn!(value, "non-finite monetary value; yielding 0");
            Decimal::ZERO
        }
    }
}

/// Create a new project by sampling the factor table.
///
/// Samples a deposit type by discovery weight, draws grade, tonnage (which
/// may be grade-linked), and capacity, derives the discovery/start years
/// from the discovery kind, then attaches co-products by re-invoking the
/// grade generator per existing tranche and prices the result.
pub fn resource_discovery<R: Rng>(
    rng: &mut R,
    factors: &FactorTable,
    year: Year,
    kind: DiscoveryKind,
    id: ProjectId,
) -> Result<Project, GenError> {
    let rows: Vec<_> = factors.rows().collect();
    if rows.is_empty() {
        return Err(GenError::NoDepositType);
    }
    let weights: Vec<f64> = rows.iter().map(|r| r.discovery_weight.max(0.0)).collect();
    let choice = WeightedIndex::new(&weights).map_err(|_| GenError::NoDepositType)?;
    let row = rows[choice.sample(rng)];

    let grade = grade_generate(rng, &row.grade, None);
    let tonnage = tonnage_generate(rng, &row.tonnage, Some(grade));
    let capacity = capacity_generate(rng, &row.capacity, tonnage);

    let period = row.development_period as Year;
    let (origin, discovery_year, start_year) = match kind {
        DiscoveryKind::Background => (Origin::Background, year, year + period),
        DiscoveryKind::Demanded => (Origin::Demanded, year - period, year),
    };

    let mut project = Project::new(ProjectSpec {
        id,
        name: format!("{}-{}-{}", row.deposit_type.0, row.region.0, id.0),
        region: row.region.clone(),
        deposit_type: row.deposit_type.clone(),
        origin,
        initial_status: ProjectStatus::Undeveloped,
        tranches: vec![tonnage],
        capacity,
        discovery_year,
        start_year: Some(start_year),
        development_probability: row.development_probability,
        expansion_tonnage: row.expansion_tonnage,
        mine_costs: row.mine_costs.clone(),
    });

    project.add_commodity(
        row.primary.clone(),
        CommodityState::new(
            true,
            row.primary_recovery,
            vec![grade],
            row.primary_value.clone(),
            row.expansion_grade,
        ),
    )?;

    let primary_grades: Vec<f64> = project
        .commodities
        .get(&row.primary)
        .map(|st| st.grades.clone())
        .unwrap_or_default();
    for co in &row.coproducts {
        let grades: Vec<f64> = primary_grades
            .iter()
            .map(|g| grade_generate(rng, &co.grade, Some(*g)))
            .collect();
        project.add_commodity(
            co.commodity.clone(),
            CommodityState::new(
                co.supply_trigger,
                co.recovery,
                grades,
                co.value_spec.clone(),
                co.dilution,
            ),
        )?;
    }

    refresh_project_value(&mut project);
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sim_core::{Commodity, CoProduct, DepositType, FactorRow, Region};

    fn porphyry_row() -> FactorRow {
        FactorRow {
            region: Region("andes".into()),
            deposit_type: DepositType("porphyry".into()),
            discovery_weight: 1.0,
            primary: Commodity::new("Cu"),
            primary_recovery: 0.9,
            grade: SampleModel::LogNormal {
                mu: -5.0,
                sigma: 0.4,
                cap: 0.03,
            },
            tonnage: SampleModel::LogNormal {
                mu: 17.0,
                sigma: 0.8,
                cap: 2.0e9,
            },
            capacity: CapacityLaw {
                coeff: 0.25,
                exponent: 0.8,
                spread: 0.1,
                min_life: 5.0,
                max_life: 50.0,
            },
            development_period: 7,
            development_probability: 0.5,
            expansion_tonnage: 0.02,
            expansion_grade: 0.95,
            primary_value: ValueSpec {
                revenue: vec![ValueTerm::PerContainedTonne { rate: 9_000.0 }],
                cost: vec![ValueTerm::PerTonne { rate: 20.0 }],
            },
            mine_costs: vec![ValueTerm::Fixed { amount: 1.0e6 }],
            coproducts: vec![CoProduct {
                commodity: Commodity::new("Mo"),
                grade: SampleModel::Multiple {
                    of: Commodity::new("Cu"),
                    factor: 0.02,
                },
                recovery: 0.6,
                supply_trigger: false,
                value_spec: ValueSpec {
                    revenue: vec![ValueTerm::PerContainedTonne { rate: 40_000.0 }],
                    cost: vec![],
                },
                dilution: 1.0,
            }],
        }
    }

    fn table() -> FactorTable {
        let mut t = FactorTable::new();
        t.insert(porphyry_row());
        t
    }

    #[test]
    fn fixed_model_is_deterministic() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let model = SampleModel::Fixed { value: 0.012 };
        assert_eq!(grade_generate(&mut rng, &model, None), 0.012);
    }

    #[test]
    fn multiple_without_reference_yields_zero() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let model = SampleModel::Multiple {
            of: Commodity::new("Cu"),
            factor: 0.5,
        };
        assert_eq!(grade_generate(&mut rng, &model, None), 0.0);
        assert_eq!(grade_generate(&mut rng, &model, Some(0.02)), 0.01);
    }

    #[test]
    fn lognormal_draws_respect_the_cap() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let model = SampleModel::LogNormal {
            mu: 0.0,
            sigma: 1.5,
            cap: 2.0,
        };
        for _ in 0..1000 {
            let g = grade_generate(&mut rng, &model, None);
            assert!(g > 0.0 && g <= 2.0);
        }
    }

    #[test]
    fn value_signs_follow_revenue_minus_cost() {
        let spec = ValueSpec {
            revenue: vec![ValueTerm::PerContainedTonne { rate: 100.0 }],
            cost: vec![ValueTerm::PerTonne { rate: 10.0 }],
        };
        // 1000 t at grade 0.0625: revenue 6250, cost 10000.
        assert_eq!(slice_value(&spec, 1000.0, 0.0625), -3750.0);
        // At grade 0.25: revenue 25000, cost 10000.
        assert_eq!(slice_value(&spec, 1000.0, 0.25), 15_000.0);
    }

    #[test]
    fn value_generate_prices_each_tranche_and_the_aggregate() {
        let spec = ValueSpec {
            revenue: vec![ValueTerm::PerTonne { rate: 2.0 }],
            cost: vec![ValueTerm::Fixed { amount: 100.0 }],
        };
        let value = value_generate(&spec, &[100.0, 50.0], &[0.1, 0.2]);
        assert_eq!(value.by_tranche.len(), 2);
        assert_eq!(value.by_tranche[0], Decimal::from(100));
        assert_eq!(value.by_tranche[1], Decimal::ZERO);
        // Aggregate is priced on totals: 150 t * 2 - 100, fixed cost once.
        assert_eq!(value.aggregate, Decimal::from(200));
    }

    #[test]
    fn background_discovery_forward_dates_the_start() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let p = resource_discovery(
            &mut rng,
            &table(),
            2030,
            DiscoveryKind::Background,
            ProjectId(9),
        )
        .unwrap();
        assert_eq!(p.origin, Origin::Background);
        assert_eq!(p.discovery_year, 2030);
        assert_eq!(p.start_year, Some(2037));
        assert_eq!(p.status, ProjectStatus::Undeveloped);
    }

    #[test]
    fn demanded_discovery_backdates_the_find() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let p = resource_discovery(
            &mut rng,
            &table(),
            2030,
            DiscoveryKind::Demanded,
            ProjectId(9),
        )
        .unwrap();
        assert_eq!(p.origin, Origin::Demanded);
        assert_eq!(p.discovery_year, 2023);
        assert_eq!(p.start_year, Some(2030));
    }

    #[test]
    fn coproduct_grades_scale_from_the_primary() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let p = resource_discovery(
            &mut rng,
            &table(),
            2030,
            DiscoveryKind::Background,
            ProjectId(9),
        )
        .unwrap();
        let cu = &p.commodities[&Commodity::new("Cu")];
        let mo = &p.commodities[&Commodity::new("Mo")];
        assert_eq!(cu.grades.len(), mo.grades.len());
        assert!((mo.grades[0] - cu.grades[0] * 0.02).abs() < 1e-12);
        assert!(!mo.balanced);
        sim_core::validate_project(&p).unwrap();
    }

    #[test]
    fn discovery_is_deterministic_under_a_seed() {
        let a = resource_discovery(
            &mut ChaCha8Rng::seed_from_u64(5),
            &table(),
            2030,
            DiscoveryKind::Background,
            ProjectId(1),
        )
        .unwrap();
        let b = resource_discovery(
            &mut ChaCha8Rng::seed_from_u64(5),
            &table(),
            2030,
            DiscoveryKind::Background,
            ProjectId(1),
        )
        .unwrap();
        assert_eq!(a.remaining, b.remaining);
        assert_eq!(a.capacity, b.capacity);
        assert_eq!(a.value, b.value);
    }

    #[test]
    fn empty_table_yields_no_deposit_type() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let err = resource_discovery(
            &mut rng,
            &FactorTable::new(),
            2030,
            DiscoveryKind::Background,
            ProjectId(1),
        )
        .unwrap_err();
        assert_eq!(err, GenError::NoDepositType);
    }

    proptest! {
        #[test]
        fn capacity_keeps_mine_life_in_bounds(
            tonnage in 1.0e6f64..1.0e9,
            seed in 0u64..1000,
        ) {
            let law = CapacityLaw {
                coeff: 0.25,
                exponent: 0.8,
                spread: 0.3,
                min_life: 5.0,
                max_life: 50.0,
            };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let capacity = capacity_generate(&mut rng, &law, tonnage);
            let life = tonnage / capacity;
            prop_assert!(life >= 5.0 - 1e-9);
            prop_assert!(life <= 50.0 + 1e-9);
        }
    }
}
