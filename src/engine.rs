//! Engine facade tying the pack, manifest, choice table, image cache and
//! surfaces together behind the boundary the host UI consumes.
//!
//! All shared state lives behind one mutex that is never held across an
//! await, so mutation is serialized the same way it is in a single-threaded
//! cooperative host. [`Engine`] is a cheap-clone handle; background decode
//! and preview tasks hold their own clones.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    archive::{Pack, RepackEncoding, RepackOutput},
    assets::{ImageCache, decode_image},
    composite::{composite_edit, composite_final},
    error::PaperdollResult,
    model::Manifest,
    resolver::ChoiceTable,
    surface::{Surface, SurfacePool},
};

/// Fixed inter-item delay of the preview drain loop.
pub const PREVIEW_DELAY: Duration = Duration::from_millis(100);

struct PreviewRequest {
    index: usize,
    value: usize,
    done: oneshot::Sender<Option<Vec<u8>>>,
}

struct EngineInner {
    pack: Pack,
    manifest: Manifest,
    table: ChoiceTable,
    images: ImageCache,
    surface: Surface,
    scratch: SurfacePool,
    image_loads: Vec<JoinHandle<()>>,
    preview_pending: VecDeque<PreviewRequest>,
    preview_draining: bool,
}

/// UI-facing row summary for building selection widgets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceSummary {
    pub label: String,
    pub options: Vec<String>,
    pub value: usize,
    pub enabled: bool,
}

/// The avatar engine. Must be created and used inside a Tokio runtime; image
/// decoding and preview rendering run as background tasks.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Mutex<EngineInner>>,
}

impl Engine {
    /// Open a pack from archive bytes (`None` for a fresh empty pack), read
    /// its manifest (defaulting on data errors) and eagerly start one decode
    /// task per layer. Archive decode failures propagate to the caller.
    pub fn load(bytes: Option<Vec<u8>>) -> PaperdollResult<Self> {
        let mut pack = match bytes {
            Some(bytes) => Pack::load(bytes)?,
            None => Pack::empty(),
        };
        let manifest = pack.read_manifest();
        let surface = Surface::new(manifest.width, manifest.height);
        let engine = Self {
            inner: Arc::new(Mutex::new(EngineInner {
                pack,
                manifest,
                table: ChoiceTable::default(),
                images: ImageCache::new(),
                surface,
                scratch: SurfacePool::default(),
                image_loads: Vec::new(),
                preview_pending: VecDeque::new(),
                preview_draining: false,
            })),
        };
        engine.spawn_image_loads();
        Ok(engine)
    }

    /// Swap in a new pack wholesale: manifest, image cache and choice table
    /// are discarded and rebuilt. In-flight preview requests from the old
    /// generation resolve against the new state or fail gracefully; previews
    /// are best-effort by contract.
    pub fn reload(&self, bytes: Option<Vec<u8>>) -> PaperdollResult<()> {
        let mut pack = match bytes {
            Some(bytes) => Pack::load(bytes)?,
            None => Pack::empty(),
        };
        let manifest = pack.read_manifest();
        {
            let mut inner = self.lock();
            for handle in inner.image_loads.drain(..) {
                handle.abort();
            }
            inner.surface = Surface::new(manifest.width, manifest.height);
            inner.pack = pack;
            inner.manifest = manifest;
            inner.table = ChoiceTable::default();
            inner.images.clear();
        }
        self.spawn_image_loads();
        Ok(())
    }

    fn spawn_image_loads(&self) {
        let mut inner = self.lock();
        let names: Vec<String> = inner
            .manifest
            .layers
            .iter()
            .map(|l| l.file_name.clone())
            .collect();
        for file_name in names {
            // Entry bytes are pulled out synchronously (the pack reader needs
            // exclusive access); decoding runs as an unordered task that
            // resolves into the cache whenever it completes.
            let bytes = match inner.pack.read_binary(&file_name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(layer = %file_name, error = %e, "missing layer image in pack");
                    continue;
                }
            };
            let engine = self.clone();
            let handle = tokio::spawn(async move {
                match decode_image(&bytes) {
                    Ok(image) => {
                        engine.lock().images.insert(file_name, image);
                    }
                    Err(e) => {
                        warn!(layer = %file_name, error = %e, "layer image failed to decode");
                    }
                }
            });
            inner.image_loads.push(handle);
        }
    }

    /// Wait for all outstanding layer decodes. Compositing before this
    /// resolves is allowed and simply skips not-yet-decoded layers.
    pub async fn images_ready(&self) {
        let handles = std::mem::take(&mut self.lock().image_loads);
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Rebuild the choice-point table from the current manifest and resize
    /// the render surface to the manifest canvas. Invalidates all previously
    /// held choice-point indices.
    #[tracing::instrument(skip(self))]
    pub fn refresh(&self) {
        let mut inner = self.lock();
        let dangling = inner.manifest.dangling_parts();
        if !dangling.is_empty() {
            warn!(layers = ?dangling, "parts reference layers missing from the manifest");
        }
        let (width, height) = (inner.manifest.width, inner.manifest.height);
        inner.surface.resize(width, height);
        let inner = &mut *inner;
        inner.table.rebuild(&inner.manifest);
    }

    /// Record a selection. No implicit re-render: callers decide when to
    /// call [`Engine::composite`] again.
    pub fn select(&self, index: usize, value: usize) -> PaperdollResult<()> {
        self.lock().table.select(index, value)
    }

    /// Render the final composite (enabled layers only) into the main
    /// surface, recomputing the enabled-layer set first.
    pub fn composite(&self) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let enabled = inner.table.enabled_layers();
        composite_final(&mut inner.surface, &inner.manifest, &inner.images, &enabled);
        debug!(enabled = enabled.len(), "composited final");
    }

    /// Render the edit-preview composite (every layer, dimming the ones
    /// outside `highlighted` when given) into the main surface.
    pub fn composite_with_highlight(&self, highlighted: Option<&[String]>) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        composite_edit(&mut inner.surface, &inner.manifest, &inner.images, highlighted);
    }

    /// Snapshot of the main surface.
    pub fn surface(&self) -> Surface {
        self.lock().surface.clone()
    }

    /// Encode the main surface as PNG (the host's save-as-image affordance).
    pub fn snapshot_png(&self) -> PaperdollResult<Vec<u8>> {
        self.lock().surface.encode_png()
    }

    /// Queue an off-screen render of "what would choice point `index` look
    /// like with `value` selected". Requests enter the queue in call order
    /// and are served strictly FIFO, one at a time, [`PREVIEW_DELAY`] apart.
    /// The returned future resolves with PNG bytes, or `None` for any failed
    /// item; it never panics and a failure never stalls later requests.
    pub fn request_preview(
        &self,
        index: usize,
        value: usize,
    ) -> impl Future<Output = Option<Vec<u8>>> + Send + use<> {
        let (done, rx) = oneshot::channel();
        let start_drain = {
            let mut inner = self.lock();
            inner.preview_pending.push_back(PreviewRequest { index, value, done });
            !std::mem::replace(&mut inner.preview_draining, true)
        };
        if start_drain {
            let engine = self.clone();
            tokio::spawn(async move { engine.drain_previews().await });
        }
        async move { rx.await.unwrap_or(None) }
    }

    async fn drain_previews(&self) {
        loop {
            let request = {
                let mut inner = self.lock();
                match inner.preview_pending.pop_front() {
                    Some(request) => request,
                    None => {
                        // Tear the queue down; the next request respawns it.
                        inner.preview_draining = false;
                        return;
                    }
                }
            };
            tokio::time::sleep(PREVIEW_DELAY).await;
            let result = self.lock().render_preview(request.index, request.value);
            let _ = request.done.send(result);
        }
    }

    /// Serialize the current manifest into the pack's manifest slot and emit
    /// the whole archive in the requested encoding.
    pub fn repack(&self, encoding: RepackEncoding) -> PaperdollResult<RepackOutput> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        inner.pack.repack(&inner.manifest, encoding)
    }

    /// Live enabled state of choice point `index`; `false` for unknown rows.
    pub fn get_category_enabled(&self, index: usize) -> bool {
        self.lock().table.is_enabled(index)
    }

    pub fn choice_point_count(&self) -> usize {
        self.lock().table.len()
    }

    /// Per-row label/options/selection snapshot for the host UI's widgets.
    pub fn choice_summaries(&self) -> Vec<ChoiceSummary> {
        let inner = self.lock();
        inner
            .table
            .rows()
            .iter()
            .enumerate()
            .map(|(index, row)| ChoiceSummary {
                label: row.entry.label.clone(),
                options: row.entry.entries.iter().map(|e| e.label.clone()).collect(),
                value: row.value,
                enabled: inner.table.is_enabled(index),
            })
            .collect()
    }

    pub fn title(&self) -> Option<String> {
        self.lock().manifest.title.clone()
    }

    pub fn set_title(&self, title: Option<String>) {
        self.lock().manifest.title = title;
    }

    pub fn description(&self) -> Option<String> {
        self.lock().manifest.description.clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        self.lock().manifest.description = description;
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        let inner = self.lock();
        (inner.manifest.width, inner.manifest.height)
    }

    pub fn manifest(&self) -> Manifest {
        self.lock().manifest.clone()
    }

    /// Replace the manifest after structural edits from the host editor.
    /// Callers must [`Engine::refresh`] afterwards; the engine assumes no
    /// structural mutation mid-recompute.
    pub fn set_manifest(&self, manifest: Manifest) {
        self.lock().manifest = manifest;
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EngineInner {
    /// Render one hypothetical selection onto a scratch surface. The layer
    /// set is exactly the hypothetical entry's parts, resolved from the
    /// row's static entry snapshot rather than live selection state.
    fn render_preview(&mut self, index: usize, value: usize) -> Option<Vec<u8>> {
        let Some(row) = self.table.get(index) else {
            warn!(index, "preview request for unknown choice point");
            return None;
        };
        let Some(entry) = row.entry.entries.get(value) else {
            warn!(index, value, "preview request for unknown entry value");
            return None;
        };
        let wanted: Vec<&str> = entry.parts.iter().map(|p| p.layer.as_str()).collect();

        let mut scratch = self
            .scratch
            .acquire(self.manifest.width, self.manifest.height);
        for layer in &self.manifest.layers {
            if !wanted.contains(&layer.file_name.as_str()) {
                continue;
            }
            if let Some(image) = self.images.get(&layer.file_name) {
                scratch.draw_image(image, 1.0);
            }
        }
        let png = match scratch.encode_png() {
            Ok(png) => Some(png),
            Err(e) => {
                warn!(index, value, error = %e, "preview encode failed");
                None
            }
        };
        self.scratch.release(scratch);
        png
    }
}
