//! Weight persistence and embedding export.
//!
//! ```text
//! <path_tmp>/<model>/model.vec.json        saved weights
//! <path_embeddings>/<model>/ent_labels.tsv one entity label per line, id order
//! <path_embeddings>/<model>/rel_labels.tsv
//! <path_embeddings>/<model>/ent_labels.json id -> label
//! <path_embeddings>/<model>/rel_labels.json
//! <path_embeddings>/<model>/<param>.tsv    one tab-separated row per id
//! <path_embeddings>/<model>/<param>.json   rows as a JSON array of arrays
//! ```
//!
//! The TSV pairs load directly into embedding projectors.

use crate::error::{Error, Result};
use crate::model::{KgeModel, Parameter};
use crate::store::KnowledgeGraphStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "model.vec.json";

#[derive(Debug, Serialize, Deserialize)]
struct SavedModel {
    model_name: String,
    parameters: Vec<Parameter>,
}

/// `<base>/<model_name>`.
pub fn model_dir(base: &Path, model_name: &str) -> PathBuf {
    base.join(model_name)
}

/// Write every parameter to `<path_tmp>/<model>/model.vec.json`.
pub fn save_model(model: &dyn KgeModel, path_tmp: &Path) -> Result<PathBuf> {
    let dir = model_dir(path_tmp, model.name());
    fs::create_dir_all(&dir)?;
    let path = dir.join(MODEL_FILE);

    let saved = SavedModel {
        model_name: model.name().to_string(),
        parameters: model.parameters().to_vec(),
    };
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(&mut writer, &saved)?;
    writer.flush()?;

    tracing::info!(path = %path.display(), "saved model weights");
    Ok(path)
}

/// Restore weights saved by [`save_model`].
///
/// Returns `false` without touching the model when nothing was saved yet.
pub fn load_model(model: &mut dyn KgeModel, path_tmp: &Path) -> Result<bool> {
    let path = model_dir(path_tmp, model.name()).join(MODEL_FILE);
    if !path.exists() {
        tracing::warn!(path = %path.display(), "no saved weights to load");
        return Ok(false);
    }

    let saved: SavedModel = serde_json::from_str(&fs::read_to_string(&path)?)?;
    if saved.model_name != model.name() {
        return Err(Error::Validation(format!(
            "{} holds weights of {}, not {}",
            path.display(),
            saved.model_name,
            model.name()
        )));
    }
    model.set_parameters(saved.parameters)?;

    tracing::info!(path = %path.display(), "loaded model weights");
    Ok(true)
}

/// Export labels and every parameter tensor for `model`.
pub fn export_embeddings(
    model: &dyn KgeModel,
    store: &dyn KnowledgeGraphStore,
    path_embeddings: &Path,
) -> Result<PathBuf> {
    let dir = model_dir(path_embeddings, model.name());
    fs::create_dir_all(&dir)?;

    write_labels(&dir, "ent_labels", &store.idx2entity())?;
    write_labels(&dir, "rel_labels", &store.idx2relation())?;

    for param in model.parameters() {
        let mut tsv = BufWriter::new(File::create(dir.join(format!("{}.tsv", param.name)))?);
        for row in param.value.outer_iter() {
            let line: Vec<String> = row.iter().map(|x| x.to_string()).collect();
            writeln!(tsv, "{}", line.join("\t"))?;
        }
        tsv.flush()?;

        let rows: Vec<Vec<f32>> = param.value.outer_iter().map(|r| r.to_vec()).collect();
        let mut json = BufWriter::new(File::create(dir.join(format!("{}.json", param.name)))?);
        serde_json::to_writer(&mut json, &rows)?;
        json.flush()?;
    }

    tracing::info!(
        path = %dir.display(),
        parameters = model.parameters().len(),
        "exported embeddings"
    );
    Ok(dir)
}

fn write_labels(dir: &Path, stem: &str, labels: &BTreeMap<usize, String>) -> Result<()> {
    let mut tsv = BufWriter::new(File::create(dir.join(format!("{stem}.tsv")))?);
    for label in labels.values() {
        writeln!(tsv, "{label}")?;
    }
    tsv.flush()?;

    let mut json = BufWriter::new(File::create(dir.join(format!("{stem}.json")))?);
    serde_json::to_writer(&mut json, labels)?;
    json.flush()?;
    Ok(())
}
