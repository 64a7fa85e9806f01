use std::io::Cursor;

use anyhow::{Context, Result};
use banana_contracts::request::AspectRatio;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use super::{ImageProvider, ProviderCall, ProviderResponse};

const DRYRUN_LONG_EDGE: u32 = 512;

/// Offline provider: one solid-colour PNG per call, coloured from the prompt
/// and worker index so parallel workers produce distinct images.
pub struct DryrunProvider;

impl ImageProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, call: &ProviderCall) -> Result<ProviderResponse> {
        let (width, height) = dims_for_ratio(call.aspect_ratio);
        let (r, g, b) = color_from_prompt(&call.prompt, call.worker_index as u64);
        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun PNG encode failed")?;

        let mut warnings = Vec::new();
        if !call.images.is_empty() {
            warnings.push(format!(
                "dryrun ignored {} reference image(s).",
                call.images.len()
            ));
        }
        Ok(ProviderResponse {
            images: vec![bytes],
            warnings,
        })
    }
}

fn dims_for_ratio(ratio: AspectRatio) -> (u32, u32) {
    let (w, h) = ratio.parts();
    if w >= h {
        (DRYRUN_LONG_EDGE, DRYRUN_LONG_EDGE * h / w)
    } else {
        (DRYRUN_LONG_EDGE * w / h, DRYRUN_LONG_EDGE)
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
