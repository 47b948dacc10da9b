/// Model catalogs: JSON files describing the pretrained models that can be loaded,
/// keyed by model name.
///
/// An entry records which zoo the model came from, where its ONNX export lives, and
/// how its inputs must be prepared. Keys we don't use (parameter counts, training set,
/// etc.) are kept as they are so catalogs can be shared with other tooling.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::extraction::ModelSource;
use crate::preprocessing::{Normalization, DEFAULT_IMAGE_INPUT_SIZE};

/// The layer a model's representations are read from. Either a single output
/// name, or a list whose first element is the name the output was exported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputLayer
{
    Name(String),
    Nodes(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry
{
    pub origin: ModelSource,
    /// Path to the ONNX export, relative to the catalog file.
    pub onnx: PathBuf,
    /// Input shape as (height, width, channels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Input shape as (channels, height, width).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_size: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<[f32; 3]>,
    #[serde(default, rename = "outputLayer", skip_serializing_if = "Option::is_none")]
    pub output_layer: Option<OutputLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defunct: Option<Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ModelEntry
{
    /// The (height, width) of the model input. Defaults to 224 x 224.
    pub fn input_dimensions(&self) -> (usize, usize)
    {
        let from_hwc = self.shape.as_ref().filter(|s| s.len() >= 2).map(|s| (s[0], s[1]));
        let from_chw = self.input_size.as_ref().filter(|s| s.len() == 3).map(|s| (s[1], s[2]));
        from_hwc.or(from_chw).unwrap_or((DEFAULT_IMAGE_INPUT_SIZE, DEFAULT_IMAGE_INPUT_SIZE))
    }

    pub fn normalization(&self) -> Normalization
    {
        let default = self.origin.default_normalization();
        Normalization {
            mean: self.mean.unwrap_or(default.mean),
            std: self.std.unwrap_or(default.std),
        }
    }

    pub fn output_name(&self) -> Option<&str>
    {
        match &self.output_layer
        {
            Some(OutputLayer::Name(name)) => Some(name),
            Some(OutputLayer::Nodes(nodes)) => nodes.first().map(String::as_str),
            None => None,
        }
    }

    /// A model is defunct if the key is present with any value other than `false`.
    pub fn is_defunct(&self) -> bool
    {
        !matches!(self.defunct, None | Some(Value::Bool(false)))
    }
}

/// A catalog entry with its ONNX path resolved against the catalog's directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec
{
    pub name: String,
    pub catalog: PathBuf,
    pub entry: ModelEntry,
}

#[derive(Debug, Clone, PartialEq)]
struct CatalogFile
{
    path: PathBuf,
    models: BTreeMap<String, ModelEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog
{
    files: Vec<CatalogFile>,
}

impl Catalog
{
    /// Reads the catalogs in order. Paths that don't exist are skipped with a warning;
    /// unreadable or invalid files are errors.
    pub fn load(paths: &[PathBuf]) -> Result<Self>
    {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths
        {
            if !path.exists() {
                warn!("Model catalog {:?} does not exist, skipping", path);
                continue;
            }
            let contents = fs::read_to_string(path)?;
            let models = serde_json::from_str(&contents)?;
            files.push(CatalogFile { path: path.clone(), models });
        }
        Ok(Catalog { files })
    }

    /// Finds a model by name. When several catalogs list it, the last one wins.
    pub fn find_model(&self, name: &str) -> Result<ModelSpec>
    {
        let (file, entry) = self.files
            .iter()
            .rev()
            .find_map(|file| file.models.get(name).map(|entry| (file, entry)))
            .ok_or_else(|| Error::ModelNotFound(name.to_string()))?;

        let mut entry = entry.clone();
        if entry.onnx.is_relative() {
            let dir = file.path.parent().unwrap_or_else(|| Path::new(""));
            entry.onnx = dir.join(&entry.onnx);
        }
        Ok(ModelSpec { name: name.to_string(), catalog: file.path.clone(), entry })
    }

    /// All usable model names in a stable order: catalogs in the order given, names
    /// sorted within each. Defunct and excluded models are left out.
    pub fn model_names(&self, excluded: &[String]) -> Vec<String>
    {
        let mut names: Vec<String> = Vec::new();
        for file in &self.files
        {
            for (name, entry) in &file.models
            {
                if entry.is_defunct() || excluded.contains(name) || names.contains(name) {
                    continue;
                }
                names.push(name.clone());
            }
        }
        names
    }

    /// Selects a model by its position in `model_names()`, for batch jobs indexed by array task ID.
    pub fn model_at(&self, index: usize, excluded: &[String]) -> Result<String>
    {
        let names = self.model_names(excluded);
        let count = names.len();
        names.into_iter().nth(index).ok_or(Error::UnknownModelIndex { index, count })
    }
}
