use std::collections::BTreeSet;

use crate::error::{PaperdollError, PaperdollResult};

/// Default canvas edge in pixels, used when a manifest omits its dimensions.
pub const DEFAULT_CANVAS_SIZE: u32 = 512;

/// The packaged document describing one avatar: canvas size, the flat ordered
/// layer list (paint order = array order, first = bottom) and the hierarchical
/// category/entry/part selection tree.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Manifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Layer>,
    pub categories: Vec<Entry>,
}

/// A drawable image reference; `file_name` is the key into both the archive's
/// binary entries and the decoded-image cache.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub file_name: String,
}

/// A node of the selection tree. A node with a non-empty `entries` list is a
/// choice point (exactly one child entry selected at a time); `parts` are the
/// layers revealed when this node's entry is the selected one. Both may be
/// present: an entry can reveal layers and expose a further nested choice.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Entry {
    pub label: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<Entry>,
}

/// Leaf effect of a selection: enables the layer named by `layer`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub layer: String,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            title: None,
            description: None,
            width: DEFAULT_CANVAS_SIZE,
            height: DEFAULT_CANVAS_SIZE,
            layers: Vec::new(),
            categories: Vec::new(),
        }
    }
}

impl Manifest {
    /// Decode a manifest document. Unknown fields are dropped; missing fields
    /// take their structural defaults (empty lists, 512x512 canvas).
    pub fn from_json_bytes(bytes: &[u8]) -> PaperdollResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PaperdollError::serde(format!("manifest parse failed: {e}")))
    }

    /// Encode the manifest document. Round-trip lossless for all modeled
    /// fields; fields unknown to the model do not survive a load/save cycle.
    pub fn to_json_bytes(&self) -> PaperdollResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| PaperdollError::serde(format!("manifest encode failed: {e}")))
    }

    pub fn validate(&self) -> PaperdollResult<()> {
        let mut seen = BTreeSet::new();
        for layer in &self.layers {
            if layer.file_name.is_empty() {
                return Err(PaperdollError::validation("layer fileName must be non-empty"));
            }
            if !seen.insert(layer.file_name.as_str()) {
                return Err(PaperdollError::validation(format!(
                    "duplicate layer fileName '{}'",
                    layer.file_name
                )));
            }
        }
        Ok(())
    }

    /// Part references that name no manifest layer. These are recoverable data
    /// errors: the referenced image is silently omitted from composites.
    pub fn dangling_parts(&self) -> Vec<String> {
        let known: BTreeSet<&str> = self.layers.iter().map(|l| l.file_name.as_str()).collect();
        let mut out = Vec::new();
        fn walk(entries: &[Entry], known: &BTreeSet<&str>, out: &mut Vec<String>) {
            for entry in entries {
                for part in &entry.parts {
                    if !known.contains(part.layer.as_str()) {
                        out.push(part.layer.clone());
                    }
                }
                walk(&entry.entries, known, out);
            }
        }
        walk(&self.categories, &known, &mut out);
        out
    }
}
