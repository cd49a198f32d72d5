//! Selection/condition resolution.
//!
//! The category tree is flattened into an ordered table of choice points, one
//! row per tree node that owns entries. Row order follows a pre-order walk of
//! the tree, so an ancestor's row always precedes its descendants' rows and a
//! single forward pass suffices to settle every `enabled` flag. Row indices
//! are ephemeral per-generation handles: any [`ChoiceTable::rebuild`] call
//! invalidates previously held indices.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{
    error::{PaperdollError, PaperdollResult},
    model::{Entry, Manifest},
};

/// One ancestor constraint: the choice point at `index` must currently have
/// `value` selected for the dependent row to be reachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Condition {
    pub index: usize,
    pub value: usize,
}

/// One row of the flattened selection table.
#[derive(Clone, Debug)]
pub struct ChoicePoint {
    /// Ancestor condition chain, outermost first. Empty for root-level rows,
    /// which are therefore always enabled.
    pub conditions: Vec<Condition>,
    /// Snapshot of the tree node owning the entries. Stays valid for preview
    /// rendering until the next rebuild, independent of live selection state.
    pub entry: Entry,
    /// Zero-based index of the currently selected child entry.
    pub value: usize,
    /// Cached result of the last condition evaluation.
    pub enabled: bool,
}

/// Flattened choice-point table plus the derived base-layer set.
#[derive(Clone, Debug, Default)]
pub struct ChoiceTable {
    rows: Vec<ChoicePoint>,
    base_layers: BTreeSet<String>,
}

impl ChoiceTable {
    /// Rebuild the table and base-layer set from scratch.
    ///
    /// Base layers start as the full manifest layer set; every layer named by
    /// any `Part` anywhere in the tree is removed (a layer gated by a choice
    /// in even one branch is not a base layer). Each node owning entries
    /// becomes a row whose `conditions` snapshot the ancestor stack, with
    /// `value` reset to 0.
    pub fn rebuild(&mut self, manifest: &Manifest) {
        self.base_layers = manifest
            .layers
            .iter()
            .map(|l| l.file_name.clone())
            .collect();
        self.rows.clear();
        let mut stack = Vec::new();
        self.walk(&manifest.categories, &mut stack);
        debug!(
            rows = self.rows.len(),
            base_layers = self.base_layers.len(),
            "choice table rebuilt"
        );
    }

    fn walk(&mut self, entries: &[Entry], stack: &mut Vec<Condition>) {
        for (sibling, entry) in entries.iter().enumerate() {
            if let Some(top) = stack.last_mut() {
                top.value = sibling;
            }
            for part in &entry.parts {
                self.base_layers.remove(&part.layer);
            }
            if entry.entries.is_empty() {
                continue;
            }
            let row_index = self.rows.len();
            self.rows.push(ChoicePoint {
                conditions: stack.clone(),
                entry: entry.clone(),
                value: 0,
                enabled: stack.is_empty(),
            });
            stack.push(Condition {
                index: row_index,
                value: 0,
            });
            self.walk(&entry.entries, stack);
            stack.pop();
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChoicePoint> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[ChoicePoint] {
        &self.rows
    }

    /// Layers belonging to no `Part` anywhere in the tree; always visible.
    pub fn base_layers(&self) -> &BTreeSet<String> {
        &self.base_layers
    }

    /// Record `value` as the selection at row `index`.
    ///
    /// Does not recompute `enabled` flags; those settle lazily on the next
    /// [`ChoiceTable::enabled_layers`] pass. Selecting on a row whose
    /// ancestors are currently disabled is allowed: the value is recorded and
    /// takes visible effect once the ancestors become enabled.
    pub fn select(&mut self, index: usize, value: usize) -> PaperdollResult<()> {
        let row = self.rows.get_mut(index).ok_or_else(|| {
            PaperdollError::validation(format!("choice point #{index} out of range"))
        })?;
        row.value = value;
        Ok(())
    }

    /// Whether every ancestor condition of row `index` holds against the live
    /// selected values. Root-level rows are always enabled.
    pub fn is_enabled(&self, index: usize) -> bool {
        let Some(row) = self.rows.get(index) else {
            return false;
        };
        row.conditions
            .iter()
            .all(|c| self.rows[c.index].value == c.value)
    }

    /// Compute the enabled-layer set: base layers plus the parts of the
    /// selected entry at every enabled choice point. Recomputes and caches
    /// every row's `enabled` flag in index order, so a parent's state is
    /// settled before any descendant's condition check runs.
    pub fn enabled_layers(&mut self) -> BTreeSet<String> {
        let mut out = self.base_layers.clone();
        for index in 0..self.rows.len() {
            let enabled = self.is_enabled(index);
            self.rows[index].enabled = enabled;
            if !enabled {
                continue;
            }
            let row = &self.rows[index];
            if let Some(selected) = row.entry.entries.get(row.value) {
                for part in &selected.parts {
                    out.insert(part.layer.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Layer, Part};

    fn layer(name: &str) -> Layer {
        Layer { file_name: name.to_string() }
    }

    fn part(name: &str) -> Part {
        Part { layer: name.to_string() }
    }

    fn leaf(label: &str, parts: &[&str]) -> Entry {
        Entry {
            label: label.to_string(),
            parts: parts.iter().map(|p| part(p)).collect(),
            entries: vec![],
        }
    }

    fn hat_manifest() -> Manifest {
        Manifest {
            layers: vec![layer("bg.png"), layer("hatA.png"), layer("hatB.png")],
            categories: vec![Entry {
                label: "Hat".to_string(),
                parts: vec![],
                entries: vec![
                    leaf("None", &[]),
                    leaf("A", &["hatA.png"]),
                    leaf("B", &["hatB.png"]),
                ],
            }],
            ..Default::default()
        }
    }

    fn nested_manifest() -> Manifest {
        Manifest {
            layers: vec![
                layer("bodyHuman.png"),
                layer("bodyRobot.png"),
                layer("armLeft.png"),
                layer("armRight.png"),
            ],
            categories: vec![Entry {
                label: "Body".to_string(),
                parts: vec![],
                entries: vec![
                    leaf("Human", &["bodyHuman.png"]),
                    Entry {
                        label: "Robot".to_string(),
                        parts: vec![part("bodyRobot.png")],
                        entries: vec![Entry {
                            label: "Arm".to_string(),
                            parts: vec![],
                            entries: vec![
                                leaf("Left", &["armLeft.png"]),
                                leaf("Right", &["armRight.png"]),
                            ],
                        }],
                    },
                ],
            }],
            ..Default::default()
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hat_example_base_and_selection() {
        let mut table = ChoiceTable::default();
        table.rebuild(&hat_manifest());
        assert_eq!(table.len(), 1);
        assert_eq!(table.base_layers(), &set(&["bg.png"]));

        assert_eq!(table.enabled_layers(), set(&["bg.png"]));
        table.select(0, 1).unwrap();
        assert_eq!(table.enabled_layers(), set(&["bg.png", "hatA.png"]));
        table.select(0, 2).unwrap();
        assert_eq!(table.enabled_layers(), set(&["bg.png", "hatB.png"]));
    }

    #[test]
    fn nested_example_gates_descendants() {
        let mut table = ChoiceTable::default();
        table.rebuild(&nested_manifest());
        // Body at index 0 (root), Arm at index 1 gated on Body=Robot.
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(1).unwrap().conditions,
            vec![Condition { index: 0, value: 1 }]
        );

        // Default: Human selected, Arm disabled.
        assert_eq!(table.enabled_layers(), set(&["bodyHuman.png"]));
        assert!(!table.get(1).unwrap().enabled);

        table.select(0, 1).unwrap();
        assert_eq!(
            table.enabled_layers(),
            set(&["bodyRobot.png", "armLeft.png"])
        );
        assert!(table.get(1).unwrap().enabled);

        table.select(1, 1).unwrap();
        assert_eq!(
            table.enabled_layers(),
            set(&["bodyRobot.png", "armRight.png"])
        );

        // Switching Body back hides the arm regardless of Arm's stored value.
        table.select(0, 0).unwrap();
        assert_eq!(table.enabled_layers(), set(&["bodyHuman.png"]));
        assert!(!table.get(1).unwrap().enabled);
        assert_eq!(table.get(1).unwrap().value, 1);
    }

    #[test]
    fn preselecting_hidden_branch_takes_effect_later() {
        let mut table = ChoiceTable::default();
        table.rebuild(&nested_manifest());
        // Arm is disabled under the default Body=Human, but the value sticks.
        table.select(1, 1).unwrap();
        assert_eq!(table.enabled_layers(), set(&["bodyHuman.png"]));
        table.select(0, 1).unwrap();
        assert_eq!(
            table.enabled_layers(),
            set(&["bodyRobot.png", "armRight.png"])
        );
    }

    #[test]
    fn rebuild_is_idempotent_and_resets_values() {
        let mut table = ChoiceTable::default();
        let manifest = nested_manifest();
        table.rebuild(&manifest);
        let first = table.enabled_layers();
        table.rebuild(&manifest);
        assert_eq!(table.enabled_layers(), first);

        table.select(0, 1).unwrap();
        table.rebuild(&manifest);
        assert_eq!(table.get(0).unwrap().value, 0);
        assert_eq!(table.enabled_layers(), first);
    }

    #[test]
    fn layer_gated_in_any_branch_is_not_base() {
        let mut manifest = hat_manifest();
        manifest.layers.push(layer("free.png"));
        // hatA.png additionally gated under a second category; still not base.
        manifest.categories.push(Entry {
            label: "Extra".to_string(),
            parts: vec![],
            entries: vec![leaf("On", &["hatA.png"]), leaf("Off", &[])],
        });
        let mut table = ChoiceTable::default();
        table.rebuild(&manifest);
        assert_eq!(table.base_layers(), &set(&["bg.png", "free.png"]));
    }

    #[test]
    fn select_out_of_range_row_is_an_error() {
        let mut table = ChoiceTable::default();
        table.rebuild(&hat_manifest());
        assert!(table.select(5, 0).is_err());
    }

    #[test]
    fn out_of_range_value_contributes_nothing() {
        let mut table = ChoiceTable::default();
        table.rebuild(&hat_manifest());
        table.select(0, 99).unwrap();
        assert_eq!(table.enabled_layers(), set(&["bg.png"]));
    }

    #[test]
    fn preorder_indices_ancestors_first() {
        let manifest = Manifest {
            layers: vec![],
            categories: vec![
                Entry {
                    label: "A".to_string(),
                    parts: vec![],
                    entries: vec![Entry {
                        label: "A0".to_string(),
                        parts: vec![],
                        entries: vec![leaf("x", &[]), leaf("y", &[])],
                    }],
                },
                Entry {
                    label: "B".to_string(),
                    parts: vec![],
                    entries: vec![leaf("z", &[])],
                },
            ],
            ..Default::default()
        };
        let mut table = ChoiceTable::default();
        table.rebuild(&manifest);
        assert_eq!(table.len(), 3);
        for (index, row) in table.rows().iter().enumerate() {
            for c in &row.conditions {
                assert!(c.index < index);
            }
        }
        assert_eq!(table.get(0).unwrap().entry.label, "A");
        assert_eq!(table.get(1).unwrap().entry.label, "A0");
        assert_eq!(table.get(2).unwrap().entry.label, "B");
        assert!(table.get(2).unwrap().conditions.is_empty());
    }
}
