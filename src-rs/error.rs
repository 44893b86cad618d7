use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrialError>;

#[derive(Debug, Error)]
pub enum TrialError {
    /// Bad or missing user input, caught before any request is made.
    #[error("{0}")]
    Validation(String),

    /// The service or image server answered with a failure, or could not be reached.
    #[error("{}", transport_message(.status_text, .body))]
    Transport {
        status: Option<u16>,
        status_text: String,
        body: String,
    },

    /// The new viewer context never reported ready.
    #[error("stopping init attempts after {retries} retries")]
    ProtocolTimeout { retries: u32 },

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl TrialError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(status: Option<u16>, status_text: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Transport {
            status,
            status_text: status_text.into(),
            body: body.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

fn transport_message(status_text: &str, body: &str) -> String {
    format!("{status_text}: {body}")
}
