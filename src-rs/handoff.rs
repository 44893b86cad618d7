//! Pushes a trial's parameters into a newly opened viewer context.
//!
//! The new context owns a [`TrialWindowEndpoint`]. It signals ready once its own
//! initial load is done and then accepts one serialized `initNewTrialForm`
//! message. The opener polls for readiness a bounded number of times and
//! gives up quietly: the new context stays usable for manual entry.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TrialError};
use crate::form::TrialForm;
use crate::model::TrialParameters;
use crate::urls::{PageLocation, NEW_TRIAL_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Readiness re-checks after the first one.
    pub retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HandoffMessage {
    #[serde(rename = "initNewTrialForm")]
    InitNewTrialForm { parameters: TrialParameters },
}

impl HandoffMessage {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| TrialError::Decode {
            what: "handoff message".to_string(),
            message: err.to_string(),
        })
    }

    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| TrialError::Decode {
            what: "handoff message".to_string(),
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// Parameters were posted after this many readiness checks.
    Delivered { checks: u32 },
    /// Nothing was loaded in the opener, so there was nothing to hand off.
    NothingToSend,
}

/// The opener's side of a new viewer context.
pub struct TrialWindowHandle {
    page: PageLocation,
    ready: Receiver<()>,
    outbox: Sender<String>,
    is_ready: bool,
}

/// The new context's side.
pub struct TrialWindowEndpoint {
    page: PageLocation,
    ready: Sender<()>,
    inbox: Receiver<String>,
}

/// Connects an opener to a new viewer context located at `page` with a "to be decided" trial id.
pub fn trial_window_channel(page: &PageLocation) -> (TrialWindowHandle, TrialWindowEndpoint) {
    let page = page.with_trial_id(NEW_TRIAL_ID);
    let (ready_tx, ready_rx) = mpsc::channel();
    let (message_tx, message_rx) = mpsc::channel();
    (
        TrialWindowHandle {
            page: page.clone(),
            ready: ready_rx,
            outbox: message_tx,
            is_ready: false,
        },
        TrialWindowEndpoint {
            page,
            ready: ready_tx,
            inbox: message_rx,
        },
    )
}

impl TrialWindowHandle {
    pub fn page(&self) -> &PageLocation {
        &self.page
    }

    fn check_ready(&mut self) -> bool {
        if !self.is_ready {
            match self.ready.try_recv() {
                Ok(()) => self.is_ready = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
        self.is_ready
    }

    fn post(&self, message: &HandoffMessage) -> Result<()> {
        let raw = message.encode()?;
        self.outbox
            .send(raw)
            .map_err(|_| TrialError::transport(None, "handoff failed", "new trial window closed"))
    }
}

impl TrialWindowEndpoint {
    pub fn page(&self) -> &PageLocation {
        &self.page
    }

    pub fn signal_ready(&self) {
        // the opener may have stopped listening already
        let _ = self.ready.send(());
    }

    /// Waits for the opener's parameters; `None` when nothing arrives in time.
    pub fn receive(&self, timeout: Duration) -> Result<Option<TrialParameters>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(raw) => match HandoffMessage::decode(&raw)? {
                HandoffMessage::InitNewTrialForm { parameters } => Ok(Some(parameters)),
            },
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

/// Hands `parameters` to the new context once it reports ready.
///
/// Checks readiness once, then up to `policy.retries` more times, `policy.interval` apart.
pub fn push_trial_parameters(
    window: &mut TrialWindowHandle,
    parameters: Option<&TrialParameters>,
    policy: RetryPolicy,
) -> Result<HandoffOutcome> {
    let Some(parameters) = parameters else {
        return Ok(HandoffOutcome::NothingToSend);
    };
    let mut retry_count = 0;
    loop {
        if window.check_ready() {
            window.post(&HandoffMessage::InitNewTrialForm {
                parameters: parameters.clone(),
            })?;
            debug!(checks = retry_count + 1, "handed trial parameters to new window");
            return Ok(HandoffOutcome::Delivered {
                checks: retry_count + 1,
            });
        }
        if retry_count >= policy.retries {
            return Err(TrialError::ProtocolTimeout {
                retries: retry_count,
            });
        }
        thread::sleep(policy.interval);
        retry_count += 1;
    }
}

/// Runs a new viewer context on its own thread: it finishes its initial load
/// after `load_delay`, then waits up to `wait` for a form to pre-fill.
///
/// The thread returns the form it ended up with, defaults when nothing arrived.
pub fn spawn_new_trial_window(
    endpoint: TrialWindowEndpoint,
    load_delay: Duration,
    wait: Duration,
) -> thread::JoinHandle<TrialForm> {
    thread::spawn(move || {
        thread::sleep(load_delay);
        info!(page = %endpoint.page().as_str(), "new trial window loaded");
        endpoint.signal_ready();
        match endpoint.receive(wait) {
            Ok(Some(parameters)) => TrialForm::from_parameters(&parameters),
            Ok(None) => TrialForm::default(),
            Err(err) => {
                warn!(error = %err, "ignoring malformed handoff message");
                TrialForm::default()
            }
        }
    })
}
