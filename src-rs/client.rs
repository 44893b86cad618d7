//! HTTP access to the match trial service and the tile image renderer.

use std::io::Read;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Result, TrialError};
use crate::model::{CanvasMatches, CreatedTrial, TrialParameters, TrialResult};
use crate::urls::ServiceEndpoints;

/// Match trial REST operations.
pub trait MatchTrialService {
    fn fetch_trial(&self, trial_id: &str) -> Result<TrialResult>;
    fn create_trial(&self, parameters: &TrialParameters) -> Result<String>;
    fn delete_trial(&self, trial_id: &str) -> Result<()>;
    fn save_matches(
        &self,
        collection_owner: &str,
        collection: &str,
        pairs: &[CanvasMatches],
    ) -> Result<()>;
}

/// Fetches encoded image bytes. Shared with the worker threads that load cells.
pub trait ImageSource: Send + Sync {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    endpoints: ServiceEndpoints,
}

impl HttpClient {
    pub fn new(endpoints: ServiceEndpoints, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent, endpoints }
    }

    fn read_json<T: DeserializeOwned>(response: ureq::Response, what: &str) -> Result<T> {
        let raw = response
            .into_string()
            .map_err(|err| TrialError::transport(None, "read failed", err.to_string()))?;
        serde_json::from_str(&raw).map_err(|err| TrialError::Decode {
            what: what.to_string(),
            message: err.to_string(),
        })
    }
}

fn transport_error(err: ureq::Error) -> TrialError {
    match err {
        ureq::Error::Status(code, response) => {
            let status_text = response.status_text().to_string();
            let body = response.into_string().unwrap_or_default();
            TrialError::transport(Some(code), status_text, body)
        }
        ureq::Error::Transport(transport) => {
            TrialError::transport(None, "transport error", transport.to_string())
        }
    }
}

impl MatchTrialService for HttpClient {
    fn fetch_trial(&self, trial_id: &str) -> Result<TrialResult> {
        let url = self.endpoints.trial_url(trial_id);
        debug!(%url, "fetching match trial");
        let response = self
            .agent
            .get(&url)
            .set("Accept", "application/json")
            .call()
            .map_err(transport_error)?;
        let trial: TrialResult = Self::read_json(response, "match trial")?;
        trial.validate()?;
        Ok(trial)
    }

    fn create_trial(&self, parameters: &TrialParameters) -> Result<String> {
        let url = self.endpoints.match_trial_url();
        debug!(%url, "creating match trial");
        let response = self
            .agent
            .post(&url)
            .set("Accept", "application/json")
            .send_json(parameters)
            .map_err(transport_error)?;
        let created: CreatedTrial = Self::read_json(response, "created trial")?;
        Ok(created.id)
    }

    fn delete_trial(&self, trial_id: &str) -> Result<()> {
        let url = self.endpoints.trial_url(trial_id);
        debug!(%url, "deleting match trial");
        self.agent.delete(&url).call().map_err(transport_error)?;
        Ok(())
    }

    fn save_matches(
        &self,
        collection_owner: &str,
        collection: &str,
        pairs: &[CanvasMatches],
    ) -> Result<()> {
        let url = self
            .endpoints
            .collection_matches_url(collection_owner, collection);
        debug!(%url, pairs = pairs.len(), "saving matches");
        self.agent
            .put(&url)
            .set("Accept", "application/json")
            .send_json(pairs)
            .map_err(transport_error)?;
        Ok(())
    }
}

impl ImageSource for HttpClient {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        debug!(%url, "fetching tile image");
        let response = self.agent.get(url).call().map_err(transport_error)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| TrialError::transport(None, "read failed", err.to_string()))?;
        Ok(bytes)
    }
}
