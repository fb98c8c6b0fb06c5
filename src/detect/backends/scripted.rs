use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{DetectParams, DetectorBackend};
use crate::detect::result::RawDetection;

/// Deterministic backend that replays queued results, one per call.
///
/// Once the queue is drained every call returns the fallback result (empty by
/// default). Used by `stub://` model locators and by tests.
pub struct ScriptedBackend {
    name: &'static str,
    queue: Mutex<VecDeque<Vec<RawDetection>>>,
    fallback: Vec<RawDetection>,
    last_params: Mutex<Option<DetectParams>>,
}

impl ScriptedBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            queue: Mutex::new(VecDeque::new()),
            fallback: Vec::new(),
            last_params: Mutex::new(None),
        }
    }

    /// Result returned whenever the queue is empty.
    pub fn with_fallback(mut self, fallback: Vec<RawDetection>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn push(&self, result: Vec<RawDetection>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(result);
        }
    }

    pub fn last_params(&self) -> Option<DetectParams> {
        self.last_params.lock().ok().and_then(|guard| *guard)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&self, _image: &RgbImage, params: &DetectParams) -> Result<Vec<RawDetection>> {
        *self
            .last_params
            .lock()
            .map_err(|_| anyhow!("scripted backend lock poisoned"))? = Some(*params);
        let next = self
            .queue
            .lock()
            .map_err(|_| anyhow!("scripted backend lock poisoned"))?
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
