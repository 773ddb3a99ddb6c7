use crate::Real;
use crate::Symbol;

/// A recoded database row: a fixed-arity numeric vector plus the symbolic
/// values carried through for supervision and reporting.
///
/// Numeric positions are already preprocessed by the caller; a missing value
/// is encoded as NaN. The id is the stable dictionary key of the row.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    id: u64,
    values: Vec<Real>,
    symbols: Vec<Symbol>,
}

impl Instance {
    pub fn new(id: u64, values: Vec<Real>) -> Self {
        Self {
            id,
            values,
            symbols: Vec::new(),
        }
    }

    pub fn with_symbols(id: u64, values: Vec<Real>, symbols: Vec<Symbol>) -> Self {
        Self {
            id,
            values,
            symbols,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn numeric(&self, index: usize) -> Real {
        self.values[index]
    }

    pub fn symbol(&self, index: usize) -> Option<&Symbol> {
        self.symbols.get(index)
    }

    pub fn values(&self) -> &[Real] {
        &self.values
    }
}

/// Marks which positions of an Instance participate in distance
/// computations. An entry is either the feature rank or INACTIVE (None);
/// inactive positions are carried through for reporting only.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureMask(Vec<Option<usize>>);

impl FeatureMask {
    pub fn new(slots: Vec<Option<usize>>) -> Self {
        Self(slots)
    }

    /// every position active, rank == position
    pub fn all_active(arity: usize) -> Self {
        Self((0..arity).map(Some).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(|slot| slot.is_some())
    }

    /// positions participating in distance computations, in order
    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| i)
    }

    pub fn active_count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }

    /// true when any active position of the instance is NaN
    pub fn has_missing(&self, instance: &Instance) -> bool {
        self.active().any(|i| instance.numeric(i).is_nan())
    }
}

/// Ordered list of distinct target modalities, main modality first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetTable {
    values: Vec<Symbol>,
}

impl TargetTable {
    /// collect distinct target symbols from the instances; sorted for
    /// determinism, main modality moved to the front when present
    pub fn read(instances: &[Instance], target_index: usize, main_modality: &str) -> Self {
        let mut values = instances
            .iter()
            .filter_map(|i| i.symbol(target_index))
            .cloned()
            .collect::<Vec<_>>();
        values.sort();
        values.dedup();
        if let Some(pos) = values.iter().position(|v| v == main_modality) {
            let main = values.remove(pos);
            values.insert(0, main);
        }
        Self { values }
    }

    pub fn from_values(values: Vec<Symbol>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.values.iter().position(|v| v == value)
    }

    pub fn value(&self, index: usize) -> &Symbol {
        &self.values[index]
    }

    pub fn values(&self) -> &[Symbol] {
        &self.values
    }

    /// register a modality first seen mid-stream (mini-batch reads)
    pub fn insert(&mut self, value: &str) -> usize {
        match self.index_of(value) {
            Some(i) => i,
            None => {
                self.values.push(value.to_string());
                self.values.len() - 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_active_positions() {
        let mask = FeatureMask::new(vec![Some(0), None, Some(1), None]);
        assert_eq!(mask.active().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(mask.active_count(), 2);
        assert!(mask.is_active(0));
        assert!(!mask.is_active(1));
    }

    #[test]
    fn mask_detects_missing_values() {
        let mask = FeatureMask::new(vec![Some(0), None, Some(1)]);
        let complete = Instance::new(0, vec![1.0, Real::NAN, 2.0]);
        let missing = Instance::new(1, vec![1.0, 0.0, Real::NAN]);
        assert!(!mask.has_missing(&complete));
        assert!(mask.has_missing(&missing));
    }

    #[test]
    fn target_table_puts_main_modality_first() {
        let rows = vec![
            Instance::with_symbols(0, vec![], vec!["no".into()]),
            Instance::with_symbols(1, vec![], vec!["yes".into()]),
            Instance::with_symbols(2, vec![], vec!["maybe".into()]),
            Instance::with_symbols(3, vec![], vec!["yes".into()]),
        ];
        let table = TargetTable::read(&rows, 0, "yes");
        assert_eq!(table.values(), &["yes", "maybe", "no"]);
        assert_eq!(table.index_of("no"), Some(2));
    }
}
