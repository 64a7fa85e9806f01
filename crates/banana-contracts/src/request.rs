use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, Result};
use crate::slots::SlotSession;

pub const MAX_REFERENCE_IMAGES: usize = 3;
pub const MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    #[default]
    TextToImage,
    Imagen,
    ImageEdit,
}

impl GenerationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToImage => "text_to_image",
            Self::Imagen => "imagen",
            Self::ImageEdit => "image_edit",
        }
    }

    pub fn requires_reference_image(self) -> bool {
        matches!(self, Self::ImageEdit)
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = ContractError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "text_to_image" | "text" | "t2i" => Ok(Self::TextToImage),
            "imagen" | "imagen4" => Ok(Self::Imagen),
            "image_edit" | "edit" | "image_to_image" | "i2i" => Ok(Self::ImageEdit),
            _ => Err(ContractError::UnknownMode(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        Self::Square,
        Self::Landscape,
        Self::Portrait,
        Self::Standard,
        Self::StandardPortrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Standard => "4:3",
            Self::StandardPortrait => "3:4",
        }
    }

    /// Width and height parts of the ratio, e.g. (16, 9).
    pub fn parts(self) -> (u32, u32) {
        match self {
            Self::Square => (1, 1),
            Self::Landscape => (16, 9),
            Self::Portrait => (9, 16),
            Self::Standard => (4, 3),
            Self::StandardPortrait => (3, 4),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ContractError;

    /// Accepts bare ratios ("16:9", "16/9") and labels that contain one
    /// ("Wide 16:9").
    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().replace('/', ":");
        Self::ALL
            .into_iter()
            .find(|ratio| normalized.contains(ratio.as_str()))
            .ok_or_else(|| ContractError::UnknownAspectRatio(raw.to_string()))
    }
}

/// One user submission. Built once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    prompt_text: String,
    image_refs: Vec<PathBuf>,
    image_numbers: Vec<usize>,
    mode: GenerationMode,
    aspect_ratio: AspectRatio,
    worker_count: usize,
}

impl GenerationRequest {
    /// Text-only request.
    pub fn new(
        prompt_text: impl Into<String>,
        mode: GenerationMode,
        aspect_ratio: AspectRatio,
        worker_count: usize,
    ) -> Result<Self> {
        Self::build(
            prompt_text.into(),
            Vec::new(),
            Vec::new(),
            mode,
            aspect_ratio,
            worker_count,
        )
    }

    /// Request whose reference images come from the occupied slots, in slot
    /// order, remembering each image's slot number for prompt references.
    pub fn from_session(
        prompt_text: impl Into<String>,
        session: &SlotSession,
        mode: GenerationMode,
        aspect_ratio: AspectRatio,
        worker_count: usize,
    ) -> Result<Self> {
        let (numbers, refs): (Vec<usize>, Vec<PathBuf>) = session
            .active_slots()
            .filter_map(|slot| slot.path().map(|path| (slot.number(), path.to_path_buf())))
            .unzip();
        Self::build(
            prompt_text.into(),
            refs,
            numbers,
            mode,
            aspect_ratio,
            worker_count,
        )
    }

    /// Request with an explicit image list numbered 1..=n.
    pub fn with_images(
        prompt_text: impl Into<String>,
        image_refs: Vec<PathBuf>,
        mode: GenerationMode,
        aspect_ratio: AspectRatio,
        worker_count: usize,
    ) -> Result<Self> {
        let numbers = (1..=image_refs.len()).collect();
        Self::build(
            prompt_text.into(),
            image_refs,
            numbers,
            mode,
            aspect_ratio,
            worker_count,
        )
    }

    fn build(
        prompt_text: String,
        image_refs: Vec<PathBuf>,
        image_numbers: Vec<usize>,
        mode: GenerationMode,
        aspect_ratio: AspectRatio,
        worker_count: usize,
    ) -> Result<Self> {
        let prompt_text = prompt_text.trim().to_string();
        if prompt_text.is_empty() {
            return Err(ContractError::EmptyPrompt);
        }
        if !(1..=MAX_WORKERS).contains(&worker_count) {
            return Err(ContractError::InvalidWorkerCount {
                count: worker_count,
                max: MAX_WORKERS,
            });
        }
        if image_refs.len() > MAX_REFERENCE_IMAGES {
            return Err(ContractError::TooManyReferenceImages {
                count: image_refs.len(),
                max: MAX_REFERENCE_IMAGES,
            });
        }
        if mode.requires_reference_image() && image_refs.is_empty() {
            return Err(ContractError::MissingReferenceImage);
        }
        Ok(Self {
            prompt_text,
            image_refs,
            image_numbers,
            mode,
            aspect_ratio,
            worker_count,
        })
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn image_refs(&self) -> &[PathBuf] {
        &self.image_refs
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Prompt as sent to the generation service. With more than one image the
    /// prompt gains a trailer naming the images by slot number.
    pub fn composed_prompt(&self) -> String {
        if self.image_refs.len() <= 1 {
            return self.prompt_text.clone();
        }
        let labels = self
            .image_numbers
            .iter()
            .map(|number| format!("Image {number}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}\n\n[Images: {} (Total: {} images)]",
            self.prompt_text,
            labels,
            self.image_refs.len()
        )
    }
}
