#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error("Image {image:?} referenced by trial {trial} has no representation.")]
    MissingImage { image: String, trial: usize },
    #[error("Malformed trial row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
    #[error("Unrecognized task {0:?}. Expected one of same_different, three_afc, oddball, exemplar_learning.")]
    UnknownTask(String),
    #[error("Representation for {image:?} has {found} features, expected {expected}.")]
    DimensionMismatch { image: String, expected: usize, found: usize },
    #[error("Model {0:?} was not found in any catalog.")]
    ModelNotFound(String),
    #[error("Model index {index} is out of range; the catalogs list {count} models.")]
    UnknownModelIndex { index: usize, count: usize },
    #[error("No images were found in {0:?}.")]
    EmptyImageSet(std::path::PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
