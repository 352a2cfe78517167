use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD};
use serde::Serialize;
use serde::de::DeserializeOwned;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::config::{ContainerState, RuntimeConfig};
use crate::containers::{AotContainer, EagerContainer, IrContainer, ScriptContainer};
use crate::error::InferError;
use crate::graph::Params;
use crate::input::PredictInput;
use crate::style::{AnomalyDetector, Classifier, Container, Predictor, TaskStyle, Transformer};

/// Engine tag written to [`MODEL_TYPE_FILE`] so a loader can dispatch before
/// touching any payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Eager,
    Script,
    Ir,
    Aot,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Eager => "eager",
            BackendKind::Script => "script",
            BackendKind::Ir => "ir",
            BackendKind::Aot => "aot",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, InferError> {
        match tag {
            "eager" => Ok(BackendKind::Eager),
            "script" => Ok(BackendKind::Script),
            "ir" => Ok(BackendKind::Ir),
            "aot" => Ok(BackendKind::Aot),
            other => Err(InferError::Bundle(format!("unknown model type tag {other:?}"))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MODEL_TYPE_FILE: &str = "model_type.txt";
pub const CONTAINER_FILE: &str = "container.bin";
pub const MODULE_FILE: &str = "module.json";
pub const PROGRAM_FILE: &str = "program.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const KERNELS_FILE: &str = "kernels.json";
pub const WEIGHTS_FILE: &str = "weights.safetensors";

/// Stages bundle files in `{root}/`, then [`BundleWriter::finish`] zips them
/// into `{root}.zip` and removes the staging directory.
pub(crate) struct BundleWriter {
    dir: PathBuf,
    archive: PathBuf,
}

impl BundleWriter {
    /// Refuses to touch the filesystem when either the staging directory or
    /// the archive already exists.
    pub fn create(location: &Path, kind: BackendKind) -> Result<Self, InferError> {
        let (archive, dir) = split_archive(location);
        if dir.exists() || archive.exists() {
            return Err(InferError::Bundle(format!(
                "save target {} already exists",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir)?;
        let writer = Self { dir, archive };
        writer.write_text(MODEL_TYPE_FILE, kind.as_str())?;
        Ok(writer)
    }

    pub fn write_text(&self, name: &str, text: &str) -> Result<(), InferError> {
        fs::write(self.dir.join(name), text)?;
        Ok(())
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), InferError> {
        let text = serde_json::to_string_pretty(value)?;
        fs::write(self.dir.join(name), text)?;
        Ok(())
    }

    pub fn write_params(&self, params: &Params) -> Result<(), InferError> {
        params.save_safetensors(&self.dir.join(WEIGHTS_FILE))
    }

    pub fn write_state(&self, state: &ContainerState) -> Result<(), InferError> {
        let bytes = bincode::serialize(state)?;
        fs::write(self.dir.join(CONTAINER_FILE), bytes)?;
        Ok(())
    }

    pub fn finish(self) -> Result<PathBuf, InferError> {
        zip_dir(&self.dir, &self.archive)?;
        fs::remove_dir_all(&self.dir)?;
        Ok(self.archive)
    }
}

fn zip_dir(dir: &Path, archive: &Path) -> Result<(), InferError> {
    let file = File::create(archive)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();
    for path in entries {
        let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            InferError::Bundle(format!("unencodable file name in {}", dir.display()))
        })?;
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(&path)?)?;
    }
    zip.finish()?;
    Ok(())
}

/// Normalize a bundle location to `(archive, directory)`: callers may hand
/// in either `{root}` or `{root}.zip`.
fn split_archive(location: &Path) -> (PathBuf, PathBuf) {
    if location.extension().is_some_and(|ext| ext == "zip") {
        (location.to_path_buf(), location.with_extension(""))
    } else {
        let mut archive = location.as_os_str().to_os_string();
        archive.push(".zip");
        (PathBuf::from(archive), location.to_path_buf())
    }
}

/// Resolve a bundle to its payload directory, extracting the archive first
/// when `unpack` is set.
pub(crate) fn open(location: &Path, unpack: bool) -> Result<PathBuf, InferError> {
    let (archive, dir) = split_archive(location);
    if unpack {
        let file = File::open(&archive).map_err(|e| {
            InferError::Bundle(format!("cannot open bundle {}: {e}", archive.display()))
        })?;
        let mut zip = ZipArchive::new(file)?;
        fs::create_dir_all(&dir)?;
        zip.extract(&dir)?;
    }
    if !dir.is_dir() {
        return Err(InferError::Bundle(format!(
            "bundle directory {} does not exist",
            dir.display()
        )));
    }
    Ok(dir)
}

pub(crate) fn read_tag(dir: &Path) -> Result<BackendKind, InferError> {
    let text = fs::read_to_string(dir.join(MODEL_TYPE_FILE))?;
    BackendKind::from_tag(text.trim())
}

pub(crate) fn check_tag(dir: &Path, expected: BackendKind) -> Result<(), InferError> {
    let found = read_tag(dir)?;
    if found != expected {
        return Err(InferError::Bundle(format!(
            "bundle is tagged {found} but was opened as {expected}"
        )));
    }
    Ok(())
}

pub(crate) fn read_state(dir: &Path) -> Result<ContainerState, InferError> {
    let bytes = fs::read(dir.join(CONTAINER_FILE))?;
    Ok(bincode::deserialize(&bytes)?)
}

pub(crate) fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T, InferError> {
    let text = fs::read_to_string(dir.join(name))?;
    Ok(serde_json::from_str(&text)?)
}

pub(crate) fn read_params(dir: &Path) -> Result<Params, InferError> {
    Params::load_safetensors(&dir.join(WEIGHTS_FILE))
}

pub(crate) fn reapply_threads(state: &ContainerState) {
    if let Some(n) = state.n_threads {
        crate::threads::apply_hint(n);
    }
}

/// A container loaded without knowing its engine up front: the tag inside
/// the bundle picks the variant, and calls forward to it.
#[derive(Debug)]
pub enum AnyContainer {
    Eager(EagerContainer),
    Script(ScriptContainer),
    Ir(IrContainer),
    Aot(AotContainer),
}

impl AnyContainer {
    pub fn load(location: &Path, unpack: bool) -> Result<Self, InferError> {
        let dir = open(location, unpack)?;
        let kind = read_tag(&dir)?;
        log::debug!("bundle at {} is tagged {kind}", dir.display());
        Ok(match kind {
            BackendKind::Eager => AnyContainer::Eager(EagerContainer::load(&dir, false)?),
            BackendKind::Script => AnyContainer::Script(ScriptContainer::load(&dir, false)?),
            BackendKind::Ir => AnyContainer::Ir(IrContainer::load(&dir, false)?),
            BackendKind::Aot => AnyContainer::Aot(AotContainer::load(&dir, false)?),
        })
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            AnyContainer::Eager(_) => BackendKind::Eager,
            AnyContainer::Script(_) => BackendKind::Script,
            AnyContainer::Ir(_) => BackendKind::Ir,
            AnyContainer::Aot(_) => BackendKind::Aot,
        }
    }

    pub fn style(&self) -> TaskStyle {
        match self {
            AnyContainer::Eager(c) => c.style(),
            AnyContainer::Script(c) => c.style(),
            AnyContainer::Ir(c) => c.style(),
            AnyContainer::Aot(c) => c.style(),
        }
    }

    pub fn batch_size(&self) -> Option<usize> {
        match self {
            AnyContainer::Eager(c) => c.batch_size(),
            AnyContainer::Script(c) => c.batch_size(),
            AnyContainer::Ir(c) => c.batch_size(),
            AnyContainer::Aot(c) => c.batch_size(),
        }
    }

    pub fn n_threads(&self) -> Option<usize> {
        match self {
            AnyContainer::Eager(c) => c.n_threads(),
            AnyContainer::Script(c) => c.n_threads(),
            AnyContainer::Ir(c) => c.n_threads(),
            AnyContainer::Aot(c) => c.n_threads(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        match self {
            AnyContainer::Eager(c) => c.config(),
            AnyContainer::Script(c) => c.config(),
            AnyContainer::Ir(c) => c.config(),
            AnyContainer::Aot(c) => c.config(),
        }
    }

    pub fn save(&self, location: &Path) -> Result<PathBuf, InferError> {
        match self {
            AnyContainer::Eager(c) => c.save(location),
            AnyContainer::Script(c) => c.save(location),
            AnyContainer::Ir(c) => c.save(location),
            AnyContainer::Aot(c) => c.save(location),
        }
    }

    pub fn transform(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<ArrayD<f32>, InferError> {
        match self {
            AnyContainer::Eager(c) => c.transform(input),
            AnyContainer::Script(c) => c.transform(input),
            AnyContainer::Ir(c) => c.transform(input),
            AnyContainer::Aot(c) => c.transform(input),
        }
    }

    pub fn predict(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        match self {
            AnyContainer::Eager(c) => c.predict(input),
            AnyContainer::Script(c) => c.predict(input),
            AnyContainer::Ir(c) => c.predict(input),
            AnyContainer::Aot(c) => c.predict(input),
        }
    }

    pub fn predict_proba(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array2<f32>, InferError> {
        match self {
            AnyContainer::Eager(c) => c.predict_proba(input),
            AnyContainer::Script(c) => c.predict_proba(input),
            AnyContainer::Ir(c) => c.predict_proba(input),
            AnyContainer::Aot(c) => c.predict_proba(input),
        }
    }

    pub fn decision_function(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        match self {
            AnyContainer::Eager(c) => c.decision_function(input),
            AnyContainer::Script(c) => c.decision_function(input),
            AnyContainer::Ir(c) => c.decision_function(input),
            AnyContainer::Aot(c) => c.decision_function(input),
        }
    }

    pub fn score_samples(
        &mut self,
        input: impl Into<PredictInput>,
    ) -> Result<Array1<f32>, InferError> {
        match self {
            AnyContainer::Eager(c) => c.score_samples(input),
            AnyContainer::Script(c) => c.score_samples(input),
            AnyContainer::Ir(c) => c.score_samples(input),
            AnyContainer::Aot(c) => c.score_samples(input),
        }
    }
}
