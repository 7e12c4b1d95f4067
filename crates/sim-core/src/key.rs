//! Wildcard group keys for result aggregation.
//!
//! Every project exposes its (origin, region, deposit type, commodity)
//! tuple expanded into all wildcard combinations, so downstream grouping
//! never re-derives the combinations per query. The wildcard is a tagged
//! variant rather than an `"ALL"` sentinel string, so a region actually
//! named "ALL" cannot collide with the aggregate.

use serde::{Deserialize, Serialize};

/// One dimension of a group key: a specific label or the wildcard.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dim {
    /// Matches every value in this dimension.
    Any,
    /// Matches exactly this label.
    Is(String),
}

impl Dim {
    /// Whether this dimension admits the given label.
    pub fn matches(&self, label: &str) -> bool {
        match self {
            Dim::Any => true,
            Dim::Is(s) => s == label,
        }
    }
}

/// Aggregation key over (origin, region, deposit type, commodity).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub origin: Dim,
    pub region: Dim,
    pub deposit_type: Dim,
    pub commodity: Dim,
}

/// Expand one specific attribute tuple into all 16 wildcard combinations.
pub fn expand(origin: &str, region: &str, deposit_type: &str, commodity: &str) -> Vec<GroupKey> {
    let pair = |s: &str| [Dim::Is(s.to_string()), Dim::Any];
    let mut keys = Vec::with_capacity(16);
    for o in pair(origin) {
        for r in pair(region) {
            for d in pair(deposit_type) {
                for c in pair(commodity) {
                    keys.push(GroupKey {
                        origin: o.clone(),
                        region: r.clone(),
                        deposit_type: d.clone(),
                        commodity: c.clone(),
                    });
                }
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_has_sixteen_combinations() {
        let keys = expand("background", "andes", "porphyry", "Cu");
        assert_eq!(keys.len(), 16);
        assert!(keys.contains(&GroupKey {
            origin: Dim::Is("background".into()),
            region: Dim::Is("andes".into()),
            deposit_type: Dim::Is("porphyry".into()),
            commodity: Dim::Is("Cu".into()),
        }));
        assert!(keys.contains(&GroupKey {
            origin: Dim::Any,
            region: Dim::Any,
            deposit_type: Dim::Any,
            commodity: Dim::Any,
        }));
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(Dim::Any.matches("Cu"));
        assert!(Dim::Is("Cu".into()).matches("Cu"));
        assert!(!Dim::Is("Cu".into()).matches("Ni"));
    }

    #[test]
    fn sentinel_named_region_does_not_collide() {
        // A literal "ALL" label stays a specific key, distinct from Any.
        let keys = expand("background", "ALL", "porphyry", "Cu");
        let specific = keys
            .iter()
            .filter(|k| k.region == Dim::Is("ALL".into()))
            .count();
        let any = keys.iter().filter(|k| k.region == Dim::Any).count();
        assert_eq!(specific, 8);
        assert_eq!(any, 8);
    }
}
