use std::fmt;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use log::{debug, info, warn};
use ndarray::{Array, Array2, Axis, Dim};
use ort::{self, inputs, CPUExecutionProvider, GraphOptimizationLevel};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::catalog::ModelSpec;
use crate::error::{Error, Result};
use crate::preprocessing::{self, Normalization, StimulusCrop};

/// Where a pretrained model came from. Decides how its inputs are laid out and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource
{
    TensorflowHub,
    Keras,
    PytorchHub,
    Timm,
    Transformers,
    PretrainedModels,
}

impl ModelSource
{
    pub fn name(&self) -> &'static str
    {
        match self
        {
            ModelSource::TensorflowHub => "tensorflow_hub",
            ModelSource::Keras => "keras",
            ModelSource::PytorchHub => "pytorch_hub",
            ModelSource::Timm => "timm",
            ModelSource::Transformers => "transformers",
            ModelSource::PretrainedModels => "pretrained_models",
        }
    }

    pub fn layout(&self) -> TensorLayout
    {
        match self
        {
            ModelSource::TensorflowHub | ModelSource::Keras => TensorLayout::ChannelsLast,
            _ => TensorLayout::ChannelsFirst,
        }
    }

    pub fn default_normalization(&self) -> Normalization
    {
        match self
        {
            ModelSource::TensorflowHub | ModelSource::Keras => Normalization::UNIT,
            ModelSource::Transformers => Normalization::HALF,
            ModelSource::PytorchHub | ModelSource::Timm | ModelSource::PretrainedModels => Normalization::IMAGENET,
        }
    }
}

impl fmt::Display for ModelSource
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout
{
    /// (batch, channel, height, width)
    ChannelsFirst,
    /// (batch, height, width, channel)
    ChannelsLast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescription
{
    pub name: String,
    pub source: ModelSource,
    pub layout: TensorLayout,
    /// (height, width)
    pub input_size: (usize, usize),
    pub normalization: Normalization,
    pub output: String,
    pub session_inputs: Vec<String>,
    pub session_outputs: Vec<String>,
}

/// A model that maps a batch of images to one feature vector per image.
pub trait RepresentationModel
{
    fn load(spec: &ModelSpec) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Returns a 2D array of shape (images.len(), features).
    fn infer(&self, images: &[DynamicImage]) -> anyhow::Result<Array2<f32>>;

    fn describe(&self) -> ModelDescription;
}

/// An ONNX runtime session plus what's needed to feed it.
struct OnnxSession
{
    session: ort::Session,
    name: String,
    source: ModelSource,
    output: String,
    height: usize,
    width: usize,
    normalization: Normalization,
}

impl OnnxSession
{
    fn new(spec: &ModelSpec) -> anyhow::Result<Self>
    {
        debug!("Loading {} from {:?}", spec.name, spec.entry.onnx);
        let session = ort::Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .commit_from_file(&spec.entry.onnx)?;

        let output = match spec.entry.output_name()
        {
            Some(name) => name.to_string(),
            None => session.outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or(anyhow::anyhow!("Model {} has no outputs", spec.name))?,
        };
        if !session.outputs.iter().any(|o| o.name == output) {
            anyhow::bail!("Model {} has no output named {:?}", spec.name, output);
        }

        let (height, width) = spec.entry.input_dimensions();
        Ok(OnnxSession {
            session,
            name: spec.name.clone(),
            source: spec.entry.origin,
            output,
            height,
            width,
            normalization: spec.entry.normalization(),
        })
    }

    fn run(&self, images: &[DynamicImage], layout: TensorLayout) -> anyhow::Result<Array2<f32>>
    {
        if images.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }

        let resized = preprocessing::prepare_images(images, self.width as u32, self.height as u32);
        let input: Array<f32, Dim<[usize; 4]>> = preprocessing::images_to_tensor(&resized, self.width, self.height, layout, &self.normalization);

        let images_len = input.len_of(Axis(0));
        let outputs = self.session.run(inputs![input]?)?;
        let output = outputs[self.output.as_str()].try_extract_tensor::<f32>()?;

        // Whatever the layer's shape, each image's activations are flattened into one vector.
        let features = output.len() / images_len;
        let output = output.to_shape((images_len, features))?.to_owned();

        Ok(output)
    }

    fn describe(&self, layout: TensorLayout) -> ModelDescription
    {
        ModelDescription {
            name: self.name.clone(),
            source: self.source,
            layout,
            input_size: (self.height, self.width),
            normalization: self.normalization,
            output: self.output.clone(),
            session_inputs: self.session.inputs.iter().map(|i| i.name.clone()).collect(),
            session_outputs: self.session.outputs.iter().map(|o| o.name.clone()).collect(),
        }
    }
}

/// Models exported from TensorFlow Hub and Keras, which take NHWC input.
pub struct ChannelsLastModel(OnnxSession);

/// Models exported from the torch family and transformers, which take NCHW input.
pub struct ChannelsFirstModel(OnnxSession);

impl RepresentationModel for ChannelsLastModel
{
    fn load(spec: &ModelSpec) -> anyhow::Result<Self>
    {
        Ok(ChannelsLastModel(OnnxSession::new(spec)?))
    }

    fn infer(&self, images: &[DynamicImage]) -> anyhow::Result<Array2<f32>>
    {
        self.0.run(images, TensorLayout::ChannelsLast)
    }

    fn describe(&self) -> ModelDescription
    {
        self.0.describe(TensorLayout::ChannelsLast)
    }
}

impl RepresentationModel for ChannelsFirstModel
{
    fn load(spec: &ModelSpec) -> anyhow::Result<Self>
    {
        Ok(ChannelsFirstModel(OnnxSession::new(spec)?))
    }

    fn infer(&self, images: &[DynamicImage]) -> anyhow::Result<Array2<f32>>
    {
        self.0.run(images, TensorLayout::ChannelsFirst)
    }

    fn describe(&self) -> ModelDescription
    {
        self.0.describe(TensorLayout::ChannelsFirst)
    }
}

/// Any catalog model, loaded with the layout its source requires.
pub enum Model
{
    ChannelsLast(ChannelsLastModel),
    ChannelsFirst(ChannelsFirstModel),
}

impl RepresentationModel for Model
{
    fn load(spec: &ModelSpec) -> anyhow::Result<Self>
    {
        match spec.entry.origin.layout()
        {
            TensorLayout::ChannelsLast => Ok(Model::ChannelsLast(ChannelsLastModel::load(spec)?)),
            TensorLayout::ChannelsFirst => Ok(Model::ChannelsFirst(ChannelsFirstModel::load(spec)?)),
        }
    }

    fn infer(&self, images: &[DynamicImage]) -> anyhow::Result<Array2<f32>>
    {
        match self
        {
            Model::ChannelsLast(model) => model.infer(images),
            Model::ChannelsFirst(model) => model.infer(images),
        }
    }

    fn describe(&self) -> ModelDescription
    {
        match self
        {
            Model::ChannelsLast(model) => model.describe(),
            Model::ChannelsFirst(model) => model.describe(),
        }
    }
}

/// The image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>>
{
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name()
    {
        let entry = entry.map_err(|e| anyhow::anyhow!("Error listing {:?}: {}", dir, e))?;
        if entry.file_type().is_file() && ImageFormat::from_path(entry.path()).is_ok() {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// Runs every image in `image_dir` through the model, `batch_size` images at a time.
/// Returns (file name, feature vector) pairs in file name order.
/// Images that can't be decoded are logged and left out.
pub fn extract_representations<M: RepresentationModel>(model: &M, image_dir: &Path, batch_size: usize, crop: Option<StimulusCrop>) -> Result<Vec<(String, Vec<f32>)>>
{
    let paths = list_images(image_dir)?;
    if paths.is_empty() {
        return Err(Error::EmptyImageSet(image_dir.to_path_buf()));
    }

    let batch_size = batch_size.max(1);
    let mut representations = Vec::with_capacity(paths.len());
    for (batch, chunk) in paths.chunks(batch_size).enumerate()
    {
        let loaded = preprocessing::load_image_batch(chunk);

        let mut names = Vec::with_capacity(loaded.len());
        let mut images = Vec::with_capacity(loaded.len());
        for (path, image) in loaded
        {
            match image
            {
                Ok(image) => {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                    names.push(name);
                    images.push(match crop {
                        Some(crop) => crop.apply(image),
                        None => image,
                    });
                },
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }
        if images.is_empty() {
            continue;
        }

        let features = model.infer(&images)?;
        if features.len_of(Axis(0)) != names.len() {
            return Err(anyhow::anyhow!("Model returned {} vectors for {} images", features.len_of(Axis(0)), names.len()).into());
        }
        for (name, row) in names.into_iter().zip(features.outer_iter())
        {
            representations.push((name, row.to_vec()));
        }
        info!("Encoded batch {} ({} / {} images)", batch + 1, representations.len(), paths.len());
    }

    Ok(representations)
}
