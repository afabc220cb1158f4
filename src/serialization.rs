//! Store output.
//!
//! Records are written as NDJSON, one `{"kind": ..., "id": ..., ...}` object
//! per line, collection by collection in the fixed emission order.

use indexmap::IndexMap;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::model::EntityKind;
use crate::store::EntityStore;

/// NDJSON (Newline Delimited JSON) writer
pub struct NdjsonWriter<W: Write> {
    writer: W,
    lines: usize,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    /// Write a single value as an NDJSON line
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        writeln!(self.writer, "{}", json)?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Write every record in the store and return per-kind counts.
///
/// Within a kind, records keep their store order.
pub fn write_store<W: Write>(store: &EntityStore, writer: &mut NdjsonWriter<W>) -> Result<IndexMap<EntityKind, usize>> {
    let mut written = IndexMap::new();
    for kind in EntityKind::EMISSION_ORDER {
        let mut count = 0;
        for record in store.get_all(*kind) {
            writer.write(record)?;
            count += 1;
        }
        if count > 0 {
            written.insert(*kind, count);
        }
    }
    writer.flush()?;
    tracing::debug!("wrote {} record(s)", writer.lines());
    Ok(written)
}

/// Write the store to an NDJSON file, replacing any existing file.
pub fn write_store_to_file<P: AsRef<Path>>(store: &EntityStore, path: P) -> Result<IndexMap<EntityKind, usize>> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| GraphError::Io(format!("failed to create {}: {}", path.display(), e)))?;
    let mut writer = NdjsonWriter::new(BufWriter::new(file));
    let written = write_store(store, &mut writer)?;
    tracing::info!("wrote {} record(s) to {}", writer.lines(), path.display());
    Ok(written)
}
