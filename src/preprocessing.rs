/// Preprocessing functions that turn stimulus images into model input tensors.
/// Layout and normalization depend on the model's source; see `extraction::TensorLayout`.

use std::path::PathBuf;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array, Dim};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::extraction::TensorLayout;

pub const DEFAULT_IMAGE_INPUT_SIZE: usize = 224;

/// Per-channel normalization applied after scaling pixels to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization
{
	pub mean: [f32; 3],
	pub std: [f32; 3],
}

impl Normalization
{
	/// Pixels are only scaled to [0, 1].
	pub const UNIT: Normalization = Normalization { mean: [0.0; 3], std: [1.0; 3] };
	pub const IMAGENET: Normalization = Normalization { mean: [0.485, 0.456, 0.406], std: [0.229, 0.224, 0.225] };
	pub const HALF: Normalization = Normalization { mean: [0.5; 3], std: [0.5; 3] };

	fn apply(&self, channel: usize, value: u8) -> f32
	{
		((value as f32) / 255. - self.mean[channel]) / self.std[channel]
	}
}

/// Crops stimuli of one exact size down to a region, e.g. to remove the response
/// panel printed under the 3AFC match images. Images of any other size are untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StimulusCrop
{
	pub when_width: u32,
	pub when_height: u32,
	pub left: u32,
	pub top: u32,
	pub right: u32,
	pub bottom: u32,
}

impl StimulusCrop
{
	/// The crop used for the 3AFC matching stimuli.
	pub const THREE_AFC: StimulusCrop = StimulusCrop { when_width: 203, when_height: 470, left: 2, top: 0, right: 202, bottom: 200 };

	/// An inverted region (right before left, or bottom above top) crops to nothing.
	pub fn apply(&self, image: DynamicImage) -> DynamicImage
	{
		if image.dimensions() != (self.when_width, self.when_height) {
			return image;
		}
		let width = self.right.saturating_sub(self.left);
		let height = self.bottom.saturating_sub(self.top);
		image.crop_imm(self.left, self.top, width, height)
	}
}

pub fn load_image_batch(paths: &[PathBuf]) -> Vec<(PathBuf, anyhow::Result<DynamicImage>)>
{
	// Load the images in parallel
	let images = paths.par_iter().map(
	{
		| path |
		{
			let img = image::open(path);
			match img
			{
				Ok(img) => (path.clone(), Ok(img)),
				Err(e) =>
				{
					(path.clone(), Err(anyhow::anyhow!("Error loading image: {:?} {:?}", path , e)))
				}
			}
		}
	}).collect::<Vec<(PathBuf, anyhow::Result<DynamicImage>)>>();

	images
}

/// Resizes every image to exactly `width` x `height`.
pub fn prepare_images(images: &[DynamicImage], width: u32, height: u32) -> Vec<DynamicImage>
{
	// Resize the images in parallel
	images.par_iter().map(
	{
		| original_img |
		{
			original_img.resize_exact(width, height, FilterType::CatmullRom)
		}
	}).collect::<Vec<DynamicImage>>()
}

/// Converts prepared images to the 4D array a model expects:
/// (batch, channel, height, width) for channels-first models,
/// (batch, height, width, channel) for channels-last models.
/// Every image must already be `width` x `height`.
pub fn images_to_tensor(images: &[DynamicImage], width: usize, height: usize, layout: TensorLayout, normalization: &Normalization) -> Array<f32, Dim<[usize; 4]>>
{
	let shape = match layout
	{
		TensorLayout::ChannelsFirst => (images.len(), 3, height, width),
		TensorLayout::ChannelsLast => (images.len(), height, width, 3),
	};
	let mut input = Array::zeros(shape);
	for (idx, img) in images.iter().enumerate()
	{
		for pixel in img.pixels() {
			let x = pixel.0 as usize;
			let y = pixel.1 as usize;
			if x >= width || y >= height {
				continue;
			}
			let [r, g, b, _] = pixel.2.0;
			for (channel, value) in [r, g, b].into_iter().enumerate()
			{
				let value = normalization.apply(channel, value);
				match layout
				{
					TensorLayout::ChannelsFirst => input[[idx, channel, y, x]] = value,
					TensorLayout::ChannelsLast => input[[idx, y, x, channel]] = value,
				}
			}
		}
	}

	input
}
