use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::{Array1, ArrayView1};
use rustc_hash::FxHashMap;

use crate::distance::euclidean_distance;
use crate::error::{Error, Result};

/// The feature vectors of one model, keyed by image file name.
///
/// Every vector in a set has the same length; inserting a vector of a different
/// length is an error, so distances between any two members are always defined.
#[derive(Debug, Clone, Default)]
pub struct RepresentationSet
{
    vectors: FxHashMap<String, Array1<f32>>,
    dimension: Option<usize>,
}

impl RepresentationSet
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut set = Self::new();
        for (name, vector) in pairs {
            set.insert(name, vector)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: String, vector: Vec<f32>) -> Result<()>
    {
        match self.dimension
        {
            Some(expected) if expected != vector.len() => {
                return Err(Error::DimensionMismatch { image: name, expected, found: vector.len() });
            },
            Some(_) => {},
            None => self.dimension = Some(vector.len()),
        }
        self.vectors.insert(name, Array1::from(vector));
        Ok(())
    }

    /// Looks up an image's vector. `trial` is only used to report where a missing image was referenced.
    pub fn get(&self, image: &str, trial: usize) -> Result<ArrayView1<'_, f32>>
    {
        self.vectors
            .get(image)
            .map(|v| v.view())
            .ok_or_else(|| Error::MissingImage { image: image.to_string(), trial })
    }

    pub fn contains(&self, image: &str) -> bool
    {
        self.vectors.contains_key(image)
    }

    /// Euclidean distance between two images of the set.
    pub fn distance(&self, a: &str, b: &str, trial: usize) -> Result<f32>
    {
        let first = self.get(a, trial)?;
        let second = self.get(b, trial)?;
        // Lengths are checked on insert, so this only fails on an inconsistent set.
        euclidean_distance(first, second).ok_or_else(|| Error::DimensionMismatch {
            image: b.to_string(),
            expected: first.len(),
            found: second.len(),
        })
    }

    pub fn len(&self) -> usize
    {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> Option<usize>
    {
        self.dimension
    }

    /// Image names in sorted order.
    pub fn names(&self) -> Vec<&str>
    {
        let mut names: Vec<&str> = self.vectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Loads a set from a JSON object mapping image names to arrays of numbers.
    pub fn load_json(path: &Path) -> Result<Self>
    {
        let contents = fs::read_to_string(path)?;
        let map: BTreeMap<String, Vec<f32>> = serde_json::from_str(&contents)?;
        Self::from_pairs(map)
    }

    pub fn save_json(&self, path: &Path) -> Result<()>
    {
        let map: BTreeMap<&str, Vec<f32>> = self.vectors
            .iter()
            .map(|(name, v)| (name.as_str(), v.to_vec()))
            .collect();
        fs::write(path, serde_json::to_string(&map)?)?;
        Ok(())
    }
}
