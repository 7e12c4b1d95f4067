//! Distribution-factor tables parametrizing stochastic generation, plus
//! the scheduled-override table applied to projects and factor rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Commodity, DepositType, Region, ValidationError, Year};

/// Distribution family for grade and tonnage draws.
///
/// The log-normal upper bound is a clamp, not a resample: draws above
/// `cap` are truncated to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SampleModel {
    /// Degenerate distribution returning `value` every draw.
    Fixed { value: f64 },
    /// Multiple of a reference commodity's grade.
    Multiple { of: Commodity, factor: f64 },
    /// Log-normal in (mu, sigma), clamped from above when `cap > 0`.
    LogNormal { mu: f64, sigma: f64, cap: f64 },
}

/// Allometric capacity law: Normal noise around `coeff * tonnage^exponent`,
/// clamped so implied mine life stays within `[min_life, max_life]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapacityLaw {
    pub coeff: f64,
    pub exponent: f64,
    /// Standard deviation as a fraction of the allometric mean.
    pub spread: f64,
    /// Shortest admissible mine life in periods.
    pub min_life: f64,
    /// Longest admissible mine life in periods.
    pub max_life: f64,
}

/// One signed contribution to a net value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ValueTerm {
    /// Constant amount.
    Fixed { amount: f64 },
    /// `rate` per tonne of ore.
    PerTonne { rate: f64 },
    /// `rate` scaled by grade (mass fraction).
    GradeScaled { rate: f64 },
    /// `rate` per tonne of contained metal.
    PerContainedTonne { rate: f64 },
}

/// Revenue and cost term lists for one commodity. Costs are magnitudes;
/// net value is revenue minus cost.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueSpec {
    pub revenue: Vec<ValueTerm>,
    pub cost: Vec<ValueTerm>,
}

/// Co-product definition attached to generated deposits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoProduct {
    pub commodity: Commodity,
    /// Grade model, re-invoked once per existing tranche.
    pub grade: SampleModel,
    pub recovery: f64,
    /// Whether unmet demand for this co-product can trigger supply.
    pub supply_trigger: bool,
    pub value_spec: ValueSpec,
    /// Brownfield grade dilution factor.
    pub dilution: f64,
}

/// Generation parameters for one (region, deposit type) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorRow {
    pub region: Region,
    pub deposit_type: DepositType,
    /// Relative weight when sampling which deposit type is discovered.
    pub discovery_weight: f64,
    pub primary: Commodity,
    pub primary_recovery: f64,
    pub grade: SampleModel,
    pub tonnage: SampleModel,
    pub capacity: CapacityLaw,
    /// Periods between discovery and earliest production start.
    pub development_period: u32,
    /// Bernoulli success probability of the development trial.
    pub development_probability: f64,
    /// Brownfield tonnage expansion fraction.
    pub expansion_tonnage: f64,
    /// Brownfield grade dilution for the primary commodity.
    pub expansion_grade: f64,
    pub primary_value: ValueSpec,
    /// Mine-level cost terms, folded into the project aggregate value.
    pub mine_costs: Vec<ValueTerm>,
    /// Co-products in attachment order.
    pub coproducts: Vec<CoProduct>,
}

/// Typed replacement for the original string-named variable access.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OverrideField {
    Recovery(Commodity),
    ProductionCapacity,
    DevelopmentProbability,
    DevelopmentPeriod,
    ExpansionTonnageFactor,
    ExpansionGradeFactor(Commodity),
    DiscoveryWeight,
}

/// A scheduled change applied to matching projects and factor rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledOverride {
    pub year: Year,
    pub region: Region,
    pub deposit_type: DepositType,
    pub field: OverrideField,
    pub value: f64,
}

/// Factor rows indexed by (region, deposit type).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorTable {
    rows: BTreeMap<(Region, DepositType), FactorRow>,
}

impl FactorTable {
    pub fn new() -> Self {
        FactorTable::default()
    }

    pub fn insert(&mut self, row: FactorRow) {
        self.rows
            .insert((row.region.clone(), row.deposit_type.clone()), row);
    }

    pub fn get(&self, region: &Region, deposit_type: &DepositType) -> Option<&FactorRow> {
        self.rows
            .get(&(region.clone(), deposit_type.clone()))
    }

    /// Rows in deterministic (region, deposit type) order.
    pub fn rows(&self) -> impl Iterator<Item = &FactorRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Apply a scheduled override to the matching row, if any. Fields that
    /// do not exist on factor rows, or commodities a row does not carry,
    /// are logged and skipped.
    pub fn apply_override(&mut self, ov: &ScheduledOverride) {
        let Some(row) = self
            .rows
            .get_mut(&(ov.region.clone(), ov.deposit_type.clone()))
        else {
            return;
        };
        match &ov.field {
            OverrideField::Recovery(c) => {
                if *c == row.primary {
                    row.primary_recovery = ov.value.clamp(0.0, 1.0);
                } else if let Some(co) = row.coproducts.iter_mut().find(|co| co.commodity == *c) {
                    co.recovery = ov.value.clamp(0.0, 1.0);
                } else {
                    warn!(
                        region = %row.region.0,
                        deposit_type = %row.deposit_type.0,
                        commodity = %c.0,
                        "recovery override for a commodity the row does not carry; skipped"
                    );
                }
            }
            OverrideField::DevelopmentProbability => {
                row.development_probability = ov.value.clamp(0.0, 1.0);
            }
            OverrideField::DevelopmentPeriod => {
                row.development_period = ov.value.max(0.0) as u32;
            }
            OverrideField::ExpansionTonnageFactor => {
                row.expansion_tonnage = ov.value.max(0.0);
            }
            OverrideField::ExpansionGradeFactor(c) => {
                if *c == row.primary {
                    row.expansion_grade = ov.value.max(0.0);
                } else if let Some(co) = row.coproducts.iter_mut().find(|co| co.commodity == *c) {
                    co.dilution = ov.value.max(0.0);
                } else {
                    warn!(
                        region = %row.region.0,
                        deposit_type = %row.deposit_type.0,
                        commodity = %c.0,
                        "dilution override for a commodity the row does not carry; skipped"
                    );
                }
            }
            OverrideField::DiscoveryWeight => {
                row.discovery_weight = ov.value.max(0.0);
            }
            OverrideField::ProductionCapacity => {
                // Capacity is a per-project quantity; rows derive it from
                // the capacity law.
                warn!(
                    region = %row.region.0,
                    deposit_type = %row.deposit_type.0,
                    "capacity override does not apply to factor rows; skipped"
                );
            }
        }
    }
}

/// Validate a factor row's parameter ranges.
pub fn validate_factor_row(row: &FactorRow) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&row.primary_recovery) {
        return Err(ValidationError::InvalidRecovery);
    }
    if !(0.0..=1.0).contains(&row.development_probability) {
        return Err(ValidationError::InvalidProbability);
    }
    if !row.discovery_weight.is_finite() || row.discovery_weight < 0.0 {
        return Err(ValidationError::InvalidFraction);
    }
    if !row.expansion_tonnage.is_finite() || row.expansion_tonnage < 0.0 {
        return Err(ValidationError::InvalidFraction);
    }
    if row.capacity.coeff <= 0.0 || row.capacity.min_life > row.capacity.max_life {
        return Err(ValidationError::NonPositiveCapacity);
    }
    for co in &row.coproducts {
        if !(0.0..=1.0).contains(&co.recovery) {
            return Err(ValidationError::InvalidRecovery);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn porphyry_row() -> FactorRow {
        FactorRow {
            region: Region("andes".into()),
            deposit_type: DepositType("porphyry".into()),
            discovery_weight: 1.0,
            primary: Commodity::new("Cu"),
            primary_recovery: 0.9,
            grade: SampleModel::LogNormal {
                mu: -5.0,
                sigma: 0.5,
                cap: 0.03,
            },
            tonnage: SampleModel::LogNormal {
                mu: 18.0,
                sigma: 1.0,
                cap: 5.0e9,
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
            mine_costs: vec![ValueTerm::Fixed { amount: 1.0e8 }],
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

    #[test]
    fn row_validates() {
        validate_factor_row(&porphyry_row()).unwrap();
    }

    #[test]
    fn serde_roundtrip_row() {
        let row = porphyry_row();
        let s = serde_json::to_string(&row).unwrap();
        let back: FactorRow = serde_json::from_str(&s).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn override_updates_coproduct_recovery() {
        let mut table = FactorTable::new();
        table.insert(porphyry_row());
        table.apply_override(&ScheduledOverride {
            year: 2030,
            region: Region("andes".into()),
            deposit_type: DepositType("porphyry".into()),
            field: OverrideField::Recovery(Commodity::new("Mo")),
            value: 0.8,
        });
        let row = table
            .get(&Region("andes".into()), &DepositType("porphyry".into()))
            .unwrap();
        assert_eq!(row.coproducts[0].recovery, 0.8);
    }

    #[test]
    fn override_for_absent_commodity_is_skipped() {
        let mut table = FactorTable::new();
        table.insert(porphyry_row());
        let before = table.clone();
        table.apply_override(&ScheduledOverride {
            year: 2030,
            region: Region("andes".into()),
            deposit_type: DepositType("porphyry".into()),
            field: OverrideField::Recovery(Commodity::new("Au")),
            value: 0.8,
        });
        assert_eq!(table, before);
    }
}
