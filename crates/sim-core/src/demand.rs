//! Per-commodity demand bookkeeping.
//!
//! The ledger holds residual demand per commodity per year and is mutated
//! in place as projects supply. Iteration order is the deterministic key
//! order of the underlying map; the orchestrator relies on it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Commodity, Year};

/// Demand state for one commodity within a scenario.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemandEntry {
    /// Whether unmet demand may trigger project supply.
    pub balanced: bool,
    /// Fraction of intermediate product that counts against demand.
    pub intermediate_recovery: f64,
    /// Residual below which dispatch stops for the period.
    pub threshold: f64,
    /// Fraction of unmet demand carried onto the next period.
    pub carry_fraction: f64,
    /// Demand mass per year.
    pub demand: BTreeMap<Year, f64>,
}

/// Scenario demand ledger, iterated in deterministic commodity order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandLedger {
    entries: BTreeMap<Commodity, DemandEntry>,
}

impl DemandLedger {
    pub fn new() -> Self {
        DemandLedger::default()
    }

    pub fn insert(&mut self, commodity: Commodity, entry: DemandEntry) {
        self.entries.insert(commodity, entry);
    }

    pub fn get(&self, commodity: &Commodity) -> Option<&DemandEntry> {
        self.entries.get(commodity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Commodity, &DemandEntry)> {
        self.entries.iter()
    }

    /// Residual demand for a commodity in a year; 0 when unknown.
    pub fn residual(&self, commodity: &Commodity, year: Year) -> f64 {
        self.entries
            .get(commodity)
            .and_then(|e| e.demand.get(&year))
            .copied()
            .unwrap_or(0.0)
    }

    /// Commodities whose unmet demand can trigger supply, in ledger order.
    pub fn balanced_commodities(&self) -> Vec<Commodity> {
        self.entries
            .iter()
            .filter(|(_, e)| e.balanced)
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Record intermediate production against residual demand.
    ///
    /// Commodities absent from the ledger are logged and skipped; the
    /// supplying project keeps its output either way.
    pub fn record_supply(&mut self, commodity: &Commodity, year: Year, intermediate: f64) {
        match self.entries.get_mut(commodity) {
            Some(entry) => {
                let slot = entry.demand.entry(year).or_insert(0.0);
                *slot = (*slot - intermediate * entry.intermediate_recovery).max(0.0);
            }
            None => {
                warn!(
                    commodity = %commodity.0,
                    year,
                    "supplied commodity absent from the demand ledger; bookkeeping skipped"
                );
            }
        }
    }

    /// Carry a fraction of this period's unmet demand onto the next.
    ///
    /// Nothing is carried past `last_year`.
    pub fn apply_carry_over(&mut self, year: Year, last_year: Year) {
        if year >= last_year {
            return;
        }
        for entry in self.entries.values_mut() {
            let residual = entry.demand.get(&year).copied().unwrap_or(0.0).max(0.0);
            let carried = residual * entry.carry_fraction;
            if carried > 0.0 {
                *entry.demand.entry(year + 1).or_insert(0.0) += carried;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(commodity: &str, year: Year, mass: f64) -> DemandLedger {
        let mut ledger = DemandLedger::new();
        ledger.insert(
            Commodity::new(commodity),
            DemandEntry {
                balanced: true,
                intermediate_recovery: 0.5,
                threshold: 0.0,
                carry_fraction: 0.25,
                demand: BTreeMap::from([(year, mass)]),
            },
        );
        ledger
    }

    #[test]
    fn supply_decrements_by_recovered_mass() {
        let mut ledger = ledger_with("Cu", 2030, 100.0);
        ledger.record_supply(&Commodity::new("Cu"), 2030, 40.0);
        // 40 t intermediate at 0.5 recovery removes 20 t of demand.
        assert_eq!(ledger.residual(&Commodity::new("Cu"), 2030), 80.0);
    }

    #[test]
    fn supply_never_drives_residual_negative() {
        let mut ledger = ledger_with("Cu", 2030, 10.0);
        ledger.record_supply(&Commodity::new("Cu"), 2030, 1_000.0);
        assert_eq!(ledger.residual(&Commodity::new("Cu"), 2030), 0.0);
    }

    #[test]
    fn unknown_commodity_is_skipped() {
        let mut ledger = ledger_with("Cu", 2030, 100.0);
        ledger.record_supply(&Commodity::new("Ni"), 2030, 40.0);
        assert_eq!(ledger.residual(&Commodity::new("Cu"), 2030), 100.0);
    }

    #[test]
    fn carry_over_adds_fraction_to_next_year() {
        let mut ledger = ledger_with("Cu", 2030, 80.0);
        ledger.apply_carry_over(2030, 2035);
        assert_eq!(ledger.residual(&Commodity::new("Cu"), 2031), 20.0);
    }

    #[test]
    fn carry_over_stops_at_last_year() {
        let mut ledger = ledger_with("Cu", 2030, 80.0);
        ledger.apply_carry_over(2030, 2030);
        assert_eq!(ledger.residual(&Commodity::new("Cu"), 2031), 0.0);
    }

    #[test]
    fn balanced_commodities_follow_ledger_order() {
        let mut ledger = ledger_with("Ni", 2030, 1.0);
        ledger.insert(
            Commodity::new("Cu"),
            DemandEntry {
                balanced: true,
                intermediate_recovery: 1.0,
                threshold: 0.0,
                carry_fraction: 0.0,
                demand: BTreeMap::new(),
            },
        );
        ledger.insert(
            Commodity::new("Au"),
            DemandEntry {
                balanced: false,
                intermediate_recovery: 1.0,
                threshold: 0.0,
                carry_fraction: 0.0,
                demand: BTreeMap::new(),
            },
        );
        let order = ledger.balanced_commodities();
        assert_eq!(order, vec![Commodity::new("Cu"), Commodity::new("Ni")]);
    }
}
