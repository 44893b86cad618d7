//! In-memory service fakes shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::client::{ImageSource, MatchTrialService};
use crate::error::{Result, TrialError};
use crate::model::{CanvasMatches, TrialParameters, TrialResult};

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([40, 40, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Serves a grey PNG of one size, failing for URLs that contain a given fragment.
pub struct FakeImageSource {
    size: (u32, u32),
    fail_containing: Option<String>,
    requests: AtomicUsize,
}

impl FakeImageSource {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            fail_containing: None,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn failing_for(mut self, url_fragment: &str) -> Self {
        self.fail_containing = Some(url_fragment.to_string());
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ImageSource for FakeImageSource {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(fragment) = &self.fail_containing {
            if url.contains(fragment.as_str()) {
                return Err(TrialError::transport(Some(404), "Not Found", url));
            }
        }
        Ok(png_bytes(self.size.0, self.size.1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Fetch(String),
    Create(TrialParameters),
    Delete(String),
    Save {
        owner: String,
        collection: String,
        pairs: Vec<CanvasMatches>,
    },
}

/// Records every call; responses are queued per operation.
#[derive(Default)]
pub struct FakeService {
    pub calls: RefCell<Vec<ServiceCall>>,
    pub trials: RefCell<VecDeque<Result<TrialResult>>>,
    pub created: RefCell<VecDeque<Result<String>>>,
    pub fail_delete: bool,
    pub fail_save: bool,
}

impl FakeService {
    pub fn serving(trial: TrialResult) -> Self {
        let service = Self::default();
        service.trials.borrow_mut().push_back(Ok(trial));
        service
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl MatchTrialService for FakeService {
    fn fetch_trial(&self, trial_id: &str) -> Result<TrialResult> {
        self.calls
            .borrow_mut()
            .push(ServiceCall::Fetch(trial_id.to_string()));
        self.trials
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TrialError::transport(Some(404), "Not Found", trial_id)))
    }

    fn create_trial(&self, parameters: &TrialParameters) -> Result<String> {
        self.calls
            .borrow_mut()
            .push(ServiceCall::Create(parameters.clone()));
        self.created
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok("new-trial-id".to_string()))
    }

    fn delete_trial(&self, trial_id: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(ServiceCall::Delete(trial_id.to_string()));
        if self.fail_delete {
            return Err(TrialError::transport(Some(500), "Server Error", "boom"));
        }
        Ok(())
    }

    fn save_matches(
        &self,
        collection_owner: &str,
        collection: &str,
        pairs: &[CanvasMatches],
    ) -> Result<()> {
        self.calls.borrow_mut().push(ServiceCall::Save {
            owner: collection_owner.to_string(),
            collection: collection.to_string(),
            pairs: pairs.to_vec(),
        });
        if self.fail_save {
            return Err(TrialError::transport(Some(409), "Conflict", "collection locked"));
        }
        Ok(())
    }
}
