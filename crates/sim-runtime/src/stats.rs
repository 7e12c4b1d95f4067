//! Folding the final project population into keyed time series.
//!
//! The output shape is the boundary contract with export and plotting
//! collaborators: a deterministic map from (wildcard group key, statistic)
//! to a year-indexed series.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sim_core::{Dim, GroupKey, Project, Year};

/// Statistic families folded from the population.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Statistic {
    /// Ore mass mined per year.
    OreProduced,
    /// Intermediate commodity mass produced per year.
    IntermediateProduced,
    /// Brownfield ore added per year.
    ExpansionOre,
    /// Brownfield contained metal added per year.
    ExpansionMetal,
    /// Projects discovered per year.
    ProjectsDiscovered,
}

/// Aggregation key: wildcard group key × statistic.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatKey {
    pub group: GroupKey,
    pub statistic: Statistic,
}

/// Keyed year series in deterministic export order.
pub type StatsTable = BTreeMap<StatKey, BTreeMap<Year, f64>>;

/// Fold the final population into keyed statistics using each project's
/// cached wildcard keys.
///
/// Ore-denominated series contribute to wildcard-commodity keys only, so
/// a multi-commodity project is never double counted; commodity series
/// contribute wherever a key's commodity dimension admits them.
pub fn fold_statistics(projects: &[Project]) -> StatsTable {
    let mut table = StatsTable::new();
    for project in projects {
        for key in project.group_keys() {
            if key.commodity == Dim::Any {
                add_series(
                    &mut table,
                    key,
                    Statistic::OreProduced,
                    &project.production_ore,
                );
                add_series(
                    &mut table,
                    key,
                    Statistic::ExpansionOre,
                    &project.expansion_ore,
                );
                add_point(
                    &mut table,
                    key,
                    Statistic::ProjectsDiscovered,
                    project.discovery_year,
                    1.0,
                );
            }
            for (commodity, state) in &project.commodities {
                if key.commodity.matches(&commodity.0) {
                    add_series(
                        &mut table,
                        key,
                        Statistic::IntermediateProduced,
                        &state.produced,
                    );
                    add_series(
                        &mut table,
                        key,
                        Statistic::ExpansionMetal,
                        &state.expansion_metal,
                    );
                }
            }
        }
    }
    table
}

fn add_series(
    table: &mut StatsTable,
    key: &GroupKey,
    statistic: Statistic,
    series: &BTreeMap<Year, f64>,
) {
    if series.is_empty() {
        return;
    }
    let slot = table
        .entry(StatKey {
            group: key.clone(),
            statistic,
        })
        .or_default();
    for (year, value) in series {
        *slot.entry(*year).or_insert(0.0) += *value;
    }
}

fn add_point(table: &mut StatsTable, key: &GroupKey, statistic: Statistic, year: Year, value: f64) {
    let slot = table
        .entry(StatKey {
            group: key.clone(),
            statistic,
        })
        .or_default();
    *slot.entry(year).or_insert(0.0) += value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{
        Commodity, CommodityState, DepositType, Origin, Project, ProjectId, ProjectSpec,
        ProjectStatus, Region, ValueSpec,
    };

    fn mine(id: u32, region: &str, commodity: &str, ore_2030: f64) -> Project {
        let mut p = Project::new(ProjectSpec {
            id: ProjectId(id),
            name: format!("mine-{id}"),
            region: Region(region.into()),
            deposit_type: DepositType("porphyry".into()),
            origin: Origin::UserActive,
            initial_status: ProjectStatus::Active,
            tranches: vec![1000.0],
            capacity: 100.0,
            discovery_year: 2020,
            start_year: Some(2020),
            development_probability: 1.0,
            expansion_tonnage: 0.0,
            mine_costs: vec![],
        });
        p.add_commodity(
            Commodity::new(commodity),
            CommodityState::new(true, 1.0, vec![0.5], ValueSpec::default(), 1.0),
        )
        .unwrap();
        p.production_ore.insert(2030, ore_2030);
        p.commodities
            .get_mut(&Commodity::new(commodity))
            .unwrap()
            .produced
            .insert(2030, ore_2030 * 0.5);
        p
    }

    fn all_wild(statistic: Statistic) -> StatKey {
        StatKey {
            group: GroupKey {
                origin: Dim::Any,
                region: Dim::Any,
                deposit_type: Dim::Any,
                commodity: Dim::Any,
            },
            statistic,
        }
    }

    #[test]
    fn fully_wildcard_key_sums_every_project() {
        let projects = vec![mine(1, "andes", "Cu", 40.0), mine(2, "laurentia", "Ni", 60.0)];
        let table = fold_statistics(&projects);
        let ore = &table[&all_wild(Statistic::OreProduced)];
        assert_eq!(ore[&2030], 100.0);
        let found = &table[&all_wild(Statistic::ProjectsDiscovered)];
        assert_eq!(found[&2020], 2.0);
    }

    #[test]
    fn specific_commodity_key_excludes_other_commodities() {
        let projects = vec![mine(1, "andes", "Cu", 40.0), mine(2, "laurentia", "Ni", 60.0)];
        let table = fold_statistics(&projects);
        let key = StatKey {
            group: GroupKey {
                origin: Dim::Any,
                region: Dim::Any,
                deposit_type: Dim::Any,
                commodity: Dim::Is("Cu".into()),
            },
            statistic: Statistic::IntermediateProduced,
        };
        assert_eq!(table[&key][&2030], 20.0);
    }

    #[test]
    fn specific_region_key_excludes_other_regions() {
        let projects = vec![mine(1, "andes", "Cu", 40.0), mine(2, "laurentia", "Cu", 60.0)];
        let table = fold_statistics(&projects);
        let key = StatKey {
            group: GroupKey {
                origin: Dim::Any,
                region: Dim::Is("andes".into()),
                deposit_type: Dim::Any,
                commodity: Dim::Any,
            },
            statistic: Statistic::OreProduced,
        };
        assert_eq!(table[&key][&2030], 40.0);
    }

    #[test]
    fn projects_without_series_leave_no_empty_entries() {
        let mut p = mine(1, "andes", "Cu", 40.0);
        p.production_ore.clear();
        p.commodities
            .get_mut(&Commodity::new("Cu"))
            .unwrap()
            .produced
            .clear();
        let table = fold_statistics(&[p]);
        assert!(!table.contains_key(&all_wild(Statistic::OreProduced)));
        assert!(!table.contains_key(&all_wild(Statistic::ExpansionOre)));
        // Discovery counts always fold.
        assert!(table.contains_key(&all_wild(Statistic::ProjectsDiscovered)));
    }
}
