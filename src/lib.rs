//! Paperdoll is a layered 2D avatar compositing engine.
//!
//! A pack (zip container) holds PNG layers plus a manifest describing the
//! canvas, the ordered layer list and a tree of mutually exclusive choices.
//! The engine flattens the tree into a choice-point table, resolves which
//! layers the current selections enable, and composites them bottom to top:
//!
//! - Load a pack into an [`Engine`] and call [`Engine::refresh`]
//! - Drive selections with [`Engine::select`] and re-render with
//!   [`Engine::composite`]
//! - Ask the background queue for hypothetical-option thumbnails with
//!   [`Engine::request_preview`]
//! - Save with [`Engine::repack`]
//!
//! The tree editor, tabs and file dialogs of a host UI sit outside this
//! crate and talk to it only through the [`Engine`] surface.
#![forbid(unsafe_code)]

pub mod archive;
pub mod assets;
pub mod composite;
pub mod engine;
pub mod error;
pub mod model;
pub mod resolver;
pub mod surface;

pub use archive::{MANIFEST_ENTRY, Pack, RepackEncoding, RepackOutput};
pub use assets::{ImageCache, PreparedImage, decode_image};
pub use composite::{EDIT_DIM_OPACITY, composite_edit, composite_final};
pub use engine::{ChoiceSummary, Engine, PREVIEW_DELAY};
pub use error::{PaperdollError, PaperdollResult};
pub use model::{DEFAULT_CANVAS_SIZE, Entry, Layer, Manifest, Part};
pub use resolver::{ChoicePoint, ChoiceTable, Condition};
pub use surface::{Surface, SurfacePool};
