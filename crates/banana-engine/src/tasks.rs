use std::sync::Arc;

use anyhow::{bail, Result};
use banana_contracts::request::GenerationRequest;
use tracing::{debug, warn};

use crate::inputs::prepare_reference_images;
use crate::orchestrator::{task, GenerationTask, TaskFactory};
use crate::providers::{error_chain_text, ImageProvider, ProviderCall};

const FAILURE_MESSAGE_MAX_CHARS: usize = 600;

/// Builds worker tasks that call one [`ImageProvider`]. Each task prepares
/// its own copy of the reference images, so decoding runs in parallel.
#[derive(Clone)]
pub struct ProviderTaskFactory {
    provider: Arc<dyn ImageProvider>,
}

impl ProviderTaskFactory {
    pub fn new(provider: Arc<dyn ImageProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

impl TaskFactory for ProviderTaskFactory {
    fn create(&self, request: &GenerationRequest, worker_index: usize) -> GenerationTask {
        let provider = Arc::clone(&self.provider);
        let prompt = request.composed_prompt();
        let mode = request.mode();
        let aspect_ratio = request.aspect_ratio();
        let image_refs = request.image_refs().to_vec();

        task(move || {
            let run = || -> Result<Vec<Vec<u8>>> {
                let images = prepare_reference_images(&image_refs)?;
                let call = ProviderCall {
                    prompt,
                    mode,
                    aspect_ratio,
                    images,
                    worker_index,
                };
                let response = provider.generate(&call)?;
                for warning in &response.warnings {
                    warn!(provider = provider.name(), worker_index, "{warning}");
                }
                if response.images.is_empty() {
                    bail!("{} returned no images", provider.name());
                }
                debug!(
                    provider = provider.name(),
                    worker_index,
                    images = response.images.len(),
                    "worker finished"
                );
                Ok(response.images)
            };
            run().map_err(|err| error_chain_text(&err, FAILURE_MESSAGE_MAX_CHARS))
        })
    }
}
