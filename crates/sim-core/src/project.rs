//! The project (deposit) entity: lifecycle state machine, tranche-based
//! resource model, constrained supply dispatch, and brownfield growth.
//!
//! A project is never deleted; depletion is a status, so historical series
//! stay addressable after the ore is gone.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::factors::{OverrideField, ValueSpec, ValueTerm};
use crate::key::{self, GroupKey};
use crate::{Commodity, DepositType, Region, ValidationError, Year};

/// Amounts below this are rounding noise, not ore.
const MASS_EPS: f64 = 1e-9;

/// Unique project identifier within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub u32);

/// How and when a project entered the population.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Imported from input data, producing from the start.
    UserActive,
    /// Imported from input data with no scheduled start.
    UserInactive,
    /// Imported from input data with a delayed start year.
    UserDelayed,
    /// Generated by scheduled background exploration.
    Background,
    /// Generated in response to unmet demand.
    Demanded,
}

impl Origin {
    /// Stable label used in aggregation keys.
    pub fn label(self) -> &'static str {
        match self {
            Origin::UserActive => "user_active",
            Origin::UserInactive => "user_inactive",
            Origin::UserDelayed => "user_delayed",
            Origin::Background => "background",
            Origin::Demanded => "demanded",
        }
    }
}

/// Lifecycle state of a project.
///
/// Transitions are one-directional except the periodic Produced -> Active
/// reset; see [`Project::supply`] and [`Project::reset_period_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    /// Development trial failed; terminal for the run.
    DevelopmentFailed,
    /// Aggregate value is negative; terminal until values change.
    NotViable,
    /// All ore extracted; terminal.
    Depleted,
    /// Discovered, development trial not yet run.
    Undeveloped,
    /// Developed and available to supply (or in care and maintenance).
    Active,
    /// Fully satisfied a demand slice this period.
    Produced,
    /// Reserved for post-depletion bookkeeping outside the engine.
    Retired,
}

impl ProjectStatus {
    /// Integer code used by export collaborators.
    pub fn code(self) -> i8 {
        match self {
            ProjectStatus::DevelopmentFailed => -3,
            ProjectStatus::NotViable => -2,
            ProjectStatus::Depleted => -1,
            ProjectStatus::Undeveloped => 0,
            ProjectStatus::Active => 1,
            ProjectStatus::Produced => 2,
            ProjectStatus::Retired => 3,
        }
    }
}

/// Net monetary value: one entry per tranche plus the aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetValue {
    /// Aggregate value across all tranches.
    pub aggregate: Decimal,
    /// Per-tranche values, parallel to the tranche sequence.
    pub by_tranche: Vec<Decimal>,
}

impl NetValue {
    /// Zero value with one slot per tranche.
    pub fn zeroed(tranches: usize) -> Self {
        NetValue {
            aggregate: Decimal::ZERO,
            by_tranche: vec![Decimal::ZERO; tranches],
        }
    }
}

/// How commodity values are gated when converting mined ore to output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueGating {
    /// Gate on the commodity's aggregate value.
    Aggregate,
    /// Gate on the value of the tranche being extracted.
    MarginalTranche,
}

/// Result of a supply attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SupplyOutcome {
    /// Ore was extracted this period.
    Supplied {
        /// Total ore mass extracted.
        ore: f64,
        /// Intermediate mass of the triggering commodity produced.
        intermediate: f64,
    },
    /// Nothing extracted; no state changed beyond the value/probability
    /// status transitions.
    DidNotSupply,
}

/// How a single tranche resolved against the demand and capacity ceilings.
#[derive(Clone, Copy, Debug, PartialEq)]
enum TrancheOutcome {
    /// Demand slice fully met; ore remains.
    Met,
    /// Capacity exhausted first; ore remains.
    CapacityCapped,
    /// Tranche emptied with demand left over.
    Exhausted,
    /// Demand met by exactly emptying the tranche.
    MetExhausted,
}

/// Per-commodity state carried by a project.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommodityState {
    /// Whether unmet demand for this commodity can trigger supply.
    pub balanced: bool,
    /// Recoverable fraction of contained mass, in [0, 1].
    pub recovery: f64,
    /// Mass-fraction grade per tranche, parallel to `Project::remaining`.
    pub grades: Vec<f64>,
    /// Net value per tranche plus aggregate.
    pub value: NetValue,
    /// Revenue/cost model used to refresh `value`.
    pub value_spec: ValueSpec,
    /// Brownfield grade dilution factor.
    pub dilution: f64,
    /// Intermediate product mass per year.
    pub produced: BTreeMap<Year, f64>,
    /// Ore-weighted mined grade per year.
    pub mined_grade: BTreeMap<Year, f64>,
    /// Contained metal added by brownfield expansion per year.
    pub expansion_metal: BTreeMap<Year, f64>,
    initial_grades: Vec<f64>,
}

impl CommodityState {
    pub fn new(
        balanced: bool,
        recovery: f64,
        grades: Vec<f64>,
        value_spec: ValueSpec,
        dilution: f64,
    ) -> Self {
        let tranches = grades.len();
        CommodityState {
            balanced,
            recovery,
            initial_grades: grades.clone(),
            grades,
            value: NetValue::zeroed(tranches),
            value_spec,
            dilution,
            produced: BTreeMap::new(),
            mined_grade: BTreeMap::new(),
            expansion_metal: BTreeMap::new(),
        }
    }

    /// Grade snapshot taken at creation; never mutated afterwards.
    pub fn initial_grades(&self) -> &[f64] {
        &self.initial_grades
    }
}

/// Creation-time description of a project; [`Project::new`] snapshots it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub id: ProjectId,
    pub name: String,
    pub region: Region,
    pub deposit_type: DepositType,
    pub origin: Origin,
    pub initial_status: ProjectStatus,
    /// Ore mass per tranche at creation.
    pub tranches: Vec<f64>,
    /// Ore mass ceiling per period.
    pub capacity: f64,
    pub discovery_year: Year,
    /// None until the development trial fixes it.
    pub start_year: Option<Year>,
    pub development_probability: f64,
    /// Brownfield tonnage expansion fraction.
    pub expansion_tonnage: f64,
    /// Mine-level cost terms folded into the aggregate value.
    pub mine_costs: Vec<ValueTerm>,
}

/// A mining project: one deposit with tranche-structured ore, commodity
/// grades, production series, and a lifecycle status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub region: Region,
    pub deposit_type: DepositType,
    pub origin: Origin,
    /// Remaining ore mass per tranche.
    pub remaining: Vec<f64>,
    /// Per-commodity grade, value, recovery, and production state.
    pub commodities: BTreeMap<Commodity, CommodityState>,
    /// Project aggregate value (all commodities plus mine-level costs).
    pub value: NetValue,
    /// Mine-level cost terms.
    pub mine_costs: Vec<ValueTerm>,
    pub discovery_year: Year,
    /// None means never activated.
    pub start_year: Option<Year>,
    /// Fixed when the final tranche is exhausted.
    pub end_year: Option<Year>,
    /// Ore mass ceiling per period.
    pub capacity: f64,
    /// Bernoulli success probability of the development trial.
    pub development_probability: f64,
    /// Brownfield tonnage expansion fraction.
    pub expansion_tonnage: f64,
    /// Ore produced per year.
    pub production_ore: BTreeMap<Year, f64>,
    /// Brownfield ore added per year.
    pub expansion_ore: BTreeMap<Year, f64>,
    pub status: ProjectStatus,
    /// Index of the first tranche still eligible for extraction.
    pub current_tranche: usize,
    initial_resource: Vec<f64>,
    initial_status: ProjectStatus,
    group_keys: Vec<GroupKey>,
}

impl Project {
    pub fn new(spec: ProjectSpec) -> Self {
        let tranches = spec.tranches.len();
        Project {
            id: spec.id,
            name: spec.name,
            region: spec.region,
            deposit_type: spec.deposit_type,
            origin: spec.origin,
            initial_resource: spec.tranches.clone(),
            remaining: spec.tranches,
            commodities: BTreeMap::new(),
            value: NetValue::zeroed(tranches),
            mine_costs: spec.mine_costs,
            discovery_year: spec.discovery_year,
            start_year: spec.start_year,
            end_year: None,
            capacity: spec.capacity,
            development_probability: spec.development_probability,
            expansion_tonnage: spec.expansion_tonnage,
            production_ore: BTreeMap::new(),
            expansion_ore: BTreeMap::new(),
            status: spec.initial_status,
            initial_status: spec.initial_status,
            current_tranche: 0,
            group_keys: Vec::new(),
        }
    }

    /// Resource snapshot taken at creation; never mutated afterwards.
    pub fn initial_resource(&self) -> &[f64] {
        &self.initial_resource
    }

    /// Status at creation; never mutated afterwards.
    pub fn initial_status(&self) -> ProjectStatus {
        self.initial_status
    }

    /// Cached wildcard aggregation keys, one set per commodity, deduplicated.
    pub fn group_keys(&self) -> &[GroupKey] {
        &self.group_keys
    }

    /// Total remaining ore across all tranches.
    pub fn total_remaining(&self) -> f64 {
        self.remaining.iter().sum()
    }

    /// Whether this project produces `commodity` as a balanced commodity.
    pub fn produces_balanced(&self, commodity: &Commodity) -> bool {
        self.commodities
            .get(commodity)
            .map(|st| st.balanced)
            .unwrap_or(false)
    }

    /// Attach a commodity. The grade tranche count must match the
    /// resource tranche count.
    pub fn add_commodity(
        &mut self,
        commodity: Commodity,
        state: CommodityState,
    ) -> Result<(), ValidationError> {
        if state.grades.len() != self.remaining.len() {
            return Err(ValidationError::TrancheMismatch(self.id.0, commodity.0));
        }
        self.commodities.insert(commodity, state);
        self.rebuild_group_keys();
        Ok(())
    }

    /// Replace a commodity's net value. Unknown commodities are logged
    /// and skipped; the run continues.
    pub fn set_commodity_value(&mut self, commodity: &Commodity, value: NetValue) {
        match self.commodities.get_mut(commodity) {
            Some(st) => st.value = value,
            None => warn!(
                project = %self.name,
                commodity = %commodity.0,
                "value update for a commodity the project does not produce; skipped"
            ),
        }
    }

    /// Apply a scheduled variable override. Unknown commodities are
    /// logged and skipped; factor-table-only fields are ignored here.
    pub fn apply_override(&mut self, field: &OverrideField, value: f64) {
        match field {
            OverrideField::Recovery(c) => match self.commodities.get_mut(c) {
                Some(st) => st.recovery = value.clamp(0.0, 1.0),
                None => warn!(
                    project = %self.name,
                    commodity = %c.0,
                    "recovery override for a commodity the project does not produce; skipped"
                ),
            },
            OverrideField::ProductionCapacity => self.capacity = value.max(0.0),
            OverrideField::DevelopmentProbability => {
                self.development_probability = value.clamp(0.0, 1.0)
            }
            OverrideField::ExpansionTonnageFactor => self.expansion_tonnage = value.max(0.0),
            OverrideField::ExpansionGradeFactor(c) => match self.commodities.get_mut(c) {
                Some(st) => st.dilution = value.max(0.0),
                None => warn!(
                    project = %self.name,
                    commodity = %c.0,
                    "dilution override for a commodity the project does not produce; skipped"
                ),
            },
            OverrideField::DiscoveryWeight | OverrideField::DevelopmentPeriod => {
                // Factor-table fields; nothing to change on a live project.
            }
        }
    }

    /// Periodic Produced -> Active reset, run before the next period's
    /// ranking.
    pub fn reset_period_status(&mut self) {
        if self.status == ProjectStatus::Produced {
            self.status = ProjectStatus::Active;
        }
    }

    /// Attempt to supply `demand` mass of `commodity` in `year`.
    ///
    /// Preconditions, checked in order: non-negative aggregate value (a
    /// negative value forces NotViable and aborts), the commodity is
    /// produced here as balanced, the start year has been reached, the
    /// project has not already produced this period and is not depleted.
    /// The development trial runs on the first eligible attempt from
    /// Undeveloped.
    ///
    /// Tranches are consumed in order from `current_tranche`, each capped
    /// by its remaining ore and by the period's residual capacity. Every
    /// commodity contained in extracted ore is mined; only those whose
    /// gated value is non-negative are recovered to intermediate output.
    pub fn supply<R: Rng>(
        &mut self,
        rng: &mut R,
        demand: f64,
        year: Year,
        commodity: &Commodity,
        gating: ValueGating,
    ) -> SupplyOutcome {
        // Negative aggregate value aborts ahead of every other check.
        if self.value.aggregate < Decimal::ZERO {
            self.status = ProjectStatus::NotViable;
            return SupplyOutcome::DidNotSupply;
        }
        let (recovery, trigger_grades) = match self.commodities.get(commodity) {
            Some(st) if st.balanced => (st.recovery, st.grades.clone()),
            _ => return SupplyOutcome::DidNotSupply,
        };
        if recovery <= 0.0 {
            debug!(
                project = %self.name,
                commodity = %commodity.0,
                "non-positive recovery; cannot supply"
            );
            return SupplyOutcome::DidNotSupply;
        }
        if let Some(start) = self.start_year {
            if start > year {
                return SupplyOutcome::DidNotSupply;
            }
        }
        match self.status {
            ProjectStatus::Undeveloped => {
                // Development trial fires on the first eligible attempt.
                if rng.gen_bool(self.development_probability.clamp(0.0, 1.0)) {
                    self.status = ProjectStatus::Active;
                    if self.start_year.is_none() {
                        self.start_year = Some(year);
                    }
                } else {
                    self.status = ProjectStatus::DevelopmentFailed;
                    return SupplyOutcome::DidNotSupply;
                }
            }
            ProjectStatus::Active => {}
            // Already produced this period, depleted, or terminal.
            _ => return SupplyOutcome::DidNotSupply,
        }

        let used = self.production_ore.get(&year).copied().unwrap_or(0.0);
        let mut residual_capacity = self.capacity - used;
        if residual_capacity <= MASS_EPS {
            return SupplyOutcome::DidNotSupply;
        }

        let mut residual_demand = demand;
        let mut outcomes: Vec<TrancheOutcome> = Vec::new();
        let mut total_ore = 0.0;
        let mut mined: BTreeMap<Commodity, f64> = BTreeMap::new();
        let mut recovered: BTreeMap<Commodity, f64> = BTreeMap::new();

        let tranche_count = self.remaining.len();
        let mut t = self.current_tranche;
        while t < tranche_count && residual_demand > MASS_EPS && residual_capacity > MASS_EPS {
            let grade = trigger_grades[t];
            if grade <= 0.0 {
                // Zero-grade tranches contribute nothing to this commodity.
                t += 1;
                continue;
            }
            let available = self.remaining[t];
            if available <= MASS_EPS {
                self.current_tranche = t + 1;
                t += 1;
                continue;
            }
            let ore_needed = residual_demand / (grade * recovery);
            let take = ore_needed.min(available).min(residual_capacity);
            self.remaining[t] -= take;
            residual_capacity -= take;
            residual_demand -= take * grade * recovery;
            total_ore += take;

            for (sym, st) in &self.commodities {
                let contained = take * st.grades[t];
                if contained <= 0.0 {
                    continue;
                }
                *mined.entry(sym.clone()).or_insert(0.0) += contained;
                let gate = match gating {
                    ValueGating::Aggregate => st.value.aggregate,
                    ValueGating::MarginalTranche => {
                        st.value.by_tranche.get(t).copied().unwrap_or(Decimal::ZERO)
                    }
                };
                if gate >= Decimal::ZERO {
                    *recovered.entry(sym.clone()).or_insert(0.0) += contained * st.recovery;
                } else {
                    debug!(
                        project = %self.name,
                        commodity = %sym.0,
                        tranche = t,
                        "negative-value commodity mined but not recovered"
                    );
                }
            }

            let exhausted = self.remaining[t] <= MASS_EPS;
            let met = residual_demand <= MASS_EPS;
            outcomes.push(match (met, exhausted) {
                (true, true) => TrancheOutcome::MetExhausted,
                (true, false) => TrancheOutcome::Met,
                (false, true) => TrancheOutcome::Exhausted,
                (false, false) => TrancheOutcome::CapacityCapped,
            });
            if exhausted {
                self.remaining[t] = 0.0;
                self.current_tranche = t + 1;
            }
            t += 1;
        }

        if total_ore <= MASS_EPS {
            return SupplyOutcome::DidNotSupply;
        }

        let prev_ore = self.production_ore.get(&year).copied().unwrap_or(0.0);
        *self.production_ore.entry(year).or_insert(0.0) += total_ore;
        for (sym, contained) in &mined {
            if let Some(st) = self.commodities.get_mut(sym) {
                let slot = st.mined_grade.entry(year).or_insert(0.0);
                *slot = (*slot * prev_ore + *contained) / (prev_ore + total_ore);
                if let Some(out) = recovered.get(sym) {
                    *st.produced.entry(year).or_insert(0.0) += *out;
                }
            }
        }

        if outcomes
            .iter()
            .any(|o| matches!(o, TrancheOutcome::Met | TrancheOutcome::MetExhausted))
        {
            self.status = ProjectStatus::Produced;
        }
        if matches!(
            outcomes.last(),
            Some(TrancheOutcome::Exhausted | TrancheOutcome::MetExhausted)
        ) {
            self.status = ProjectStatus::Depleted;
            if self.end_year.is_none() {
                self.end_year = Some(year);
            }
        }

        let intermediate = recovered.get(commodity).copied().unwrap_or(0.0);
        SupplyOutcome::Supplied {
            ore: total_ore,
            intermediate,
        }
    }

    /// Brownfield expansion: append one tranche grown from the current
    /// resource base.
    ///
    /// The new tranche's grade is the resource-weighted mean grade times
    /// the commodity's dilution factor, and it inherits the previous
    /// tranche's value as a placeholder until the next refresh.
    pub fn expand_resource(&mut self, year: Year) {
        let total = self.total_remaining();
        let mass = (total * self.expansion_tonnage).max(0.0);
        for st in self.commodities.values_mut() {
            let mean_grade = if total > 0.0 {
                st.grades
                    .iter()
                    .zip(&self.remaining)
                    .map(|(g, r)| g * r)
                    .sum::<f64>()
                    / total
            } else {
                0.0
            };
            let grade = mean_grade * st.dilution;
            st.grades.push(grade);
            let placeholder = st.value.by_tranche.last().copied().unwrap_or(Decimal::ZERO);
            st.value.by_tranche.push(placeholder);
            if mass > 0.0 {
                *st.expansion_metal.entry(year).or_insert(0.0) += mass * grade;
            }
        }
        let placeholder = self.value.by_tranche.last().copied().unwrap_or(Decimal::ZERO);
        self.value.by_tranche.push(placeholder);
        self.remaining.push(mass);
        if mass > 0.0 {
            *self.expansion_ore.entry(year).or_insert(0.0) += mass;
        }
    }

    fn rebuild_group_keys(&mut self) {
        let keys: BTreeSet<GroupKey> = self
            .commodities
            .keys()
            .flat_map(|c| {
                key::expand(
                    self.origin.label(),
                    &self.region.0,
                    &self.deposit_type.0,
                    &c.0,
                )
            })
            .collect();
        self.group_keys = keys.into_iter().collect();
    }
}

/// Validate a project's structural invariants.
pub fn validate_project(p: &Project) -> Result<(), ValidationError> {
    let tranches = p.remaining.len();
    if p.value.by_tranche.len() != tranches {
        return Err(ValidationError::TrancheMismatch(p.id.0, "aggregate".into()));
    }
    for (c, st) in &p.commodities {
        if st.grades.len() != tranches || st.value.by_tranche.len() != tranches {
            return Err(ValidationError::TrancheMismatch(p.id.0, c.0.clone()));
        }
        if !(0.0..=1.0).contains(&st.recovery) {
            return Err(ValidationError::InvalidRecovery);
        }
    }
    if p.remaining.iter().any(|r| !r.is_finite() || *r < 0.0) {
        return Err(ValidationError::InvalidResource);
    }
    if p.capacity <= 0.0 {
        return Err(ValidationError::NonPositiveCapacity);
    }
    if !(0.0..=1.0).contains(&p.development_probability) {
        return Err(ValidationError::InvalidProbability);
    }
    Ok(())
}
