use std::io::{Cursor, Read, Write};

use anyhow::Context;
use tracing::warn;
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{
    error::{PaperdollError, PaperdollResult},
    model::Manifest,
};

/// Archive entry name of the manifest document.
pub const MANIFEST_ENTRY: &str = "data.json";

/// Output encoding selected by the caller of [`Pack::repack`] /
/// [`crate::Engine::repack`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepackEncoding {
    /// Raw archive bytes.
    Bytes,
    /// Archive bytes as a standard base64 string.
    Base64,
}

/// Repacked archive in the requested encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepackOutput {
    Bytes(Vec<u8>),
    Base64(String),
}

impl RepackOutput {
    fn encode(bytes: Vec<u8>, encoding: RepackEncoding) -> Self {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        match encoding {
            RepackEncoding::Bytes => Self::Bytes(bytes),
            RepackEncoding::Base64 => Self::Base64(STANDARD.encode(bytes)),
        }
    }
}

/// A single-file package: one manifest document entry plus zero or more
/// binary image entries, each addressed by the `Layer.fileName` it backs.
#[derive(Debug)]
pub struct Pack {
    archive: Option<ZipArchive<Cursor<Vec<u8>>>>,
}

impl Pack {
    /// An archive with no entries; reading its manifest yields the
    /// structurally defaulted empty manifest.
    pub fn empty() -> Self {
        Self { archive: None }
    }

    /// Decode a zip container from memory. Corrupt containers are an I/O
    /// error propagated to the caller.
    pub fn load(bytes: Vec<u8>) -> PaperdollResult<Self> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| PaperdollError::archive(format!("failed to open pack: {e}")))?;
        Ok(Self {
            archive: Some(archive),
        })
    }

    /// Read and decode the manifest document. Absent or unparsable manifests
    /// are logged and replaced by the structural default, never surfaced as
    /// an error: a partially broken package must still render whatever is
    /// renderable.
    pub fn read_manifest(&mut self) -> Manifest {
        let bytes = match self.read_binary(MANIFEST_ENTRY) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "pack has no readable manifest entry, using empty manifest");
                return Manifest::default();
            }
        };
        match Manifest::from_json_bytes(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "manifest entry failed to parse, using empty manifest");
                Manifest::default()
            }
        }
    }

    /// Read one binary entry's bytes by name.
    pub fn read_binary(&mut self, name: &str) -> PaperdollResult<Vec<u8>> {
        let Some(archive) = self.archive.as_mut() else {
            return Err(PaperdollError::archive(format!(
                "entry '{name}' not found in empty pack"
            )));
        };
        let mut file = archive
            .by_name(name)
            .map_err(|e| PaperdollError::archive(format!("entry '{name}': {e}")))?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .context("read pack entry")
            .map_err(PaperdollError::from)?;
        Ok(bytes)
    }

    /// Names of all entries in the pack, manifest included.
    pub fn entry_names(&self) -> Vec<String> {
        match &self.archive {
            Some(archive) => archive.file_names().map(str::to_string).collect(),
            None => Vec::new(),
        }
    }

    /// Rewrite the container with `manifest` serialized into the manifest
    /// slot, keeping every binary entry, and return it in `encoding`.
    pub fn repack(
        &mut self,
        manifest: &Manifest,
        encoding: RepackEncoding,
    ) -> PaperdollResult<RepackOutput> {
        let manifest_json = manifest.to_json_bytes()?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        if let Some(archive) = self.archive.as_mut() {
            for i in 0..archive.len() {
                let entry = archive
                    .by_index_raw(i)
                    .map_err(|e| PaperdollError::archive(format!("repack read entry: {e}")))?;
                if entry.name() == MANIFEST_ENTRY {
                    continue;
                }
                writer
                    .raw_copy_file(entry)
                    .map_err(|e| PaperdollError::archive(format!("repack copy entry: {e}")))?;
            }
        }
        writer
            .start_file(MANIFEST_ENTRY, SimpleFileOptions::default())
            .map_err(|e| PaperdollError::archive(format!("repack write manifest: {e}")))?;
        writer
            .write_all(&manifest_json)
            .context("write manifest entry")
            .map_err(PaperdollError::from)?;
        let cursor = writer
            .finish()
            .map_err(|e| PaperdollError::archive(format!("repack finish: {e}")))?;
        Ok(RepackOutput::encode(cursor.into_inner(), encoding))
    }
}
