#![deny(warnings)]

//! Headless CLI: builds a demo copper scenario, runs it, and prints a
//! supply summary. The engine itself is a library; this driver only wires
//! inputs together and reports results.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use sim_core::*;
use sim_runtime::{run_scenarios, Scenario, StatKey, Statistic};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    years: u32,
    iterations: u32,
    seed: u64,
    dump_projects: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        years: 20,
        iterations: 4,
        seed: 42,
        dump_projects: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--years" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.years = v;
                }
            }
            "--iterations" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.iterations = v;
                }
            }
            "--seed" => {
                if let Some(v) = it.next().and_then(|s| s.parse().ok()) {
                    args.seed = v;
                }
            }
            "--dump-projects" => args.dump_projects = true,
            _ => {}
        }
    }
    args
}

fn demo_scenario(args: &Args) -> Scenario {
    let start_year: Year = 2025;
    let end_year = start_year + args.years as Year - 1;

    let mut factors = FactorTable::new();
    factors.insert(FactorRow {
        region: Region("andes".into()),
        deposit_type: DepositType("porphyry".into()),
        discovery_weight: 3.0,
        primary: Commodity::new("Cu"),
        primary_recovery: 0.88,
        grade: SampleModel::LogNormal {
            mu: -4.8,
            sigma: 0.5,
            cap: 0.04,
        },
        tonnage: SampleModel::LogNormal {
            mu: 17.5,
            sigma: 0.9,
            cap: 3.0e9,
        },
        capacity: CapacityLaw {
            coeff: 0.25,
            exponent: 0.8,
            spread: 0.15,
            min_life: 8.0,
            max_life: 40.0,
        },
        development_period: 7,
        development_probability: 0.6,
        expansion_tonnage: 0.02,
        expansion_grade: 0.95,
        primary_value: ValueSpec {
            revenue: vec![ValueTerm::PerContainedTonne { rate: 9_000.0 }],
            cost: vec![
                ValueTerm::PerTonne { rate: 18.0 },
                ValueTerm::Fixed { amount: 2.0e8 },
            ],
        },
        mine_costs: vec![ValueTerm::Fixed { amount: 5.0e7 }],
        coproducts: vec![CoProduct {
            commodity: Commodity::new("Mo"),
            grade: SampleModel::Multiple {
                of: Commodity::new("Cu"),
                factor: 0.025,
            },
            recovery: 0.6,
            supply_trigger: false,
            value_spec: ValueSpec {
                revenue: vec![ValueTerm::PerContainedTonne { rate: 40_000.0 }],
                cost: vec![],
            },
            dilution: 1.0,
        }],
    });
    factors.insert(FactorRow {
        region: Region("yilgarn".into()),
        deposit_type: DepositType("sediment-hosted".into()),
        discovery_weight: 1.0,
        primary: Commodity::new("Cu"),
        primary_recovery: 0.8,
        grade: SampleModel::LogNormal {
            mu: -4.0,
            sigma: 0.4,
            cap: 0.06,
        },
        tonnage: SampleModel::LogNormal {
            mu: 16.0,
            sigma: 0.7,
            cap: 5.0e8,
        },
        capacity: CapacityLaw {
            coeff: 0.3,
            exponent: 0.75,
            spread: 0.1,
            min_life: 6.0,
            max_life: 30.0,
        },
        development_period: 5,
        development_probability: 0.5,
        expansion_tonnage: 0.015,
        expansion_grade: 0.9,
        primary_value: ValueSpec {
            revenue: vec![ValueTerm::PerContainedTonne { rate: 9_000.0 }],
            cost: vec![
                ValueTerm::PerTonne { rate: 25.0 },
                ValueTerm::Fixed { amount: 1.0e8 },
            ],
        },
        mine_costs: vec![ValueTerm::Fixed { amount: 2.0e7 }],
        coproducts: vec![],
    });

    let mut demand = DemandLedger::new();
    demand.insert(
        Commodity::new("Cu"),
        DemandEntry {
            balanced: true,
            intermediate_recovery: 0.95,
            threshold: 1_000.0,
            carry_fraction: 0.2,
            // 25 Mt growing 2% a year.
            demand: (start_year..=end_year)
                .enumerate()
                .map(|(i, y)| (y, 2.5e7 * 1.02f64.powi(i as i32)))
                .collect::<BTreeMap<_, _>>(),
        },
    );

    // A seed population of operating mines.
    let mut projects = Vec::new();
    for (idx, (name, tonnage, grade)) in [
        ("escondida-like", 2.0e9, 0.006),
        ("collahuasi-like", 1.4e9, 0.008),
        ("kamoa-like", 8.0e8, 0.02),
    ]
    .into_iter()
    .enumerate()
    {
        let mut p = Project::new(ProjectSpec {
            id: ProjectId(idx as u32),
            name: name.into(),
            region: Region("andes".into()),
            deposit_type: DepositType("porphyry".into()),
            origin: Origin::UserActive,
            initial_status: ProjectStatus::Active,
            tranches: vec![tonnage],
            capacity: tonnage / 25.0,
            discovery_year: start_year - 10,
            start_year: Some(start_year),
            development_probability: 1.0,
            expansion_tonnage: 0.02,
            mine_costs: vec![ValueTerm::Fixed { amount: 5.0e7 }],
        });
        p.add_commodity(
            Commodity::new("Cu"),
            CommodityState::new(
                true,
                0.88,
                vec![grade],
                ValueSpec {
                    revenue: vec![ValueTerm::PerContainedTonne { rate: 9_000.0 }],
                    cost: vec![ValueTerm::PerTonne { rate: 18.0 }],
                },
                0.95,
            ),
        )
        .expect("seed project tranche counts match");
        sim_econ::refresh_project_value(&mut p);
        projects.push(p);
    }

    Scenario {
        name: "copper-base".into(),
        params: SimParams {
            start_year,
            end_year,
            iterations: args.iterations,
            rng_seed: args.seed,
            background_greenfield: true,
            background_per_year: 3,
            demanded_greenfield: true,
            demand_discovery_cap: 200,
            brownfield: true,
            reprice_each_period: true,
            priority_active: true,
            marginal_value_gating: false,
        },
        factors,
        demand,
        projects,
        overrides: vec![ScheduledOverride {
            year: start_year + 5,
            region: Region("andes".into()),
            deposit_type: DepositType("porphyry".into()),
            field: OverrideField::Recovery(Commodity::new("Cu")),
            value: 0.92,
        }],
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    info!(
        build = env!("GIT_SHA"),
        years = args.years,
        iterations = args.iterations,
        seed = args.seed,
        "starting supply forecast"
    );

    let scenario = demo_scenario(&args);
    let results = run_scenarios(std::slice::from_ref(&scenario));
    let iterations = results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no scenario result"))??;

    let total_ore_key = StatKey {
        group: GroupKey {
            origin: Dim::Any,
            region: Dim::Any,
            deposit_type: Dim::Any,
            commodity: Dim::Any,
        },
        statistic: Statistic::OreProduced,
    };
    let cu_key = StatKey {
        group: GroupKey {
            origin: Dim::Any,
            region: Dim::Any,
            deposit_type: Dim::Any,
            commodity: Dim::Is("Cu".into()),
        },
        statistic: Statistic::IntermediateProduced,
    };

    println!(
        "Scenario {} | iterations: {} | years: {}-{}",
        scenario.name, scenario.params.iterations, scenario.params.start_year, scenario.params.end_year
    );
    for result in &iterations {
        let ore: f64 = result
            .stats
            .get(&total_ore_key)
            .map(|s| s.values().sum())
            .unwrap_or(0.0);
        let copper: f64 = result
            .stats
            .get(&cu_key)
            .map(|s| s.values().sum())
            .unwrap_or(0.0);
        let depleted = result
            .projects
            .iter()
            .filter(|p| p.status == ProjectStatus::Depleted)
            .count();
        println!(
            "iter {} | projects: {} | depleted: {} | ore: {:.3e} t | Cu intermediate: {:.3e} t",
            result.iteration,
            result.projects.len(),
            depleted,
            ore,
            copper
        );
    }

    if args.dump_projects {
        let first = iterations
            .first()
            .ok_or_else(|| anyhow!("no iterations produced"))?;
        println!("{}", serde_json::to_string_pretty(&first.projects)?);
    }

    Ok(())
}
