//! URL plumbing: service endpoints, image URLs derived from render parameters,
//! tile path parsing, and the viewer's page location.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::error::{Result, TrialError};

pub const RENDER_PARAMETERS: &str = "render-parameters";
pub const JPEG_IMAGE: &str = "jpeg-image";
pub const TRIAL_ID_PARAM: &str = "matchTrialId";
pub const NEW_TRIAL_ID: &str = "TBD";

const DEFAULT_RENDER_SCALE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    base_url: String,
    owner: String,
}

impl ServiceEndpoints {
    pub fn new(base_url: &str, owner: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
        }
    }

    pub fn match_trial_url(&self) -> String {
        format!("{}/owner/{}/matchTrial", self.base_url, self.owner)
    }

    pub fn trial_url(&self, trial_id: &str) -> String {
        format!("{}/{}", self.match_trial_url(), trial_id)
    }

    /// Collections can belong to another owner than the trial.
    pub fn collection_matches_url(&self, collection_owner: &str, collection: &str) -> String {
        format!(
            "{}/owner/{}/matchCollection/{}/matches",
            self.base_url, collection_owner, collection
        )
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|err| TrialError::InvalidUrl {
        url: raw.to_string(),
        message: err.to_string(),
    })
}

/// Sets `name=value` in place, keeping the position of the first occurrence.
fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut replaced = false;
    pairs.retain_mut(|(k, v)| {
        if k != name {
            return true;
        }
        if replaced {
            return false;
        }
        *v = value.to_string();
        replaced = true;
        true
    });
    if !replaced {
        pairs.push((name.to_string(), value.to_string()));
    }
    url.query_pairs_mut().clear().extend_pairs(pairs);
}

/// Image URL for a render parameters URL, rendered at `view_scale`.
pub fn image_url_for(render_parameters_url: &str, view_scale: f64) -> Result<Url> {
    let mut url = parse_url(&render_parameters_url.replace(RENDER_PARAMETERS, JPEG_IMAGE))?;
    set_query_param(&mut url, "scale", &view_scale.to_string());
    Ok(url)
}

/// The `scale` the trial was run at; 1.0 when absent or unparseable.
pub fn render_scale_of(render_parameters_url: &str) -> f64 {
    Url::parse(render_parameters_url)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "scale")
                .and_then(|(_, v)| v.parse::<f64>().ok())
        })
        .filter(|scale| scale.is_finite())
        .unwrap_or(DEFAULT_RENDER_SCALE)
}

pub fn is_render_parameters_url(raw: &str) -> bool {
    raw.contains(RENDER_PARAMETERS)
}

/// Short display name for a render parameters URL: its second to last path segment.
pub fn render_parameters_link_name(raw: &str) -> &str {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() > 2 {
        parts[parts.len() - 2]
    } else {
        raw
    }
}

/// Components of `.../render-ws/.../owner/O/project/P/stack/S/tile/T/render-parameters...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePath {
    pub render_ws_base: String,
    pub owner: String,
    pub project: String,
    pub stack: String,
    pub tile_id: String,
    pub group_id: String,
}

fn tile_path_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(.*/render-ws).*/owner/([^/]+)/project/([^/]+)/stack/([^/]+)/tile/([0-9]+\.([0-9]+\.[0-9]+))/render-parameters.*",
            )
            .ok()
        })
        .as_ref()
}

impl TilePath {
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = tile_path_regex()?.captures(raw)?;
        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
        Some(Self {
            render_ws_base: group(1)?,
            owner: group(2)?,
            project: group(3)?,
            stack: group(4)?,
            tile_id: group(5)?,
            group_id: group(6)?,
        })
    }

    /// Link to the tile pair comparison view for a saved pair.
    pub fn tile_pair_view_url(&self, q: &TilePath, match_owner: &str, match_collection: &str) -> String {
        format!(
            "{}/view/tile-pair.html?renderScale=0.1&renderStackOwner={}&renderStackProject={}&renderStack={}\
             &matchOwner={}&matchCollection={}&pGroupId={}&pId={}&qGroupId={}&qId={}",
            self.render_ws_base,
            self.owner,
            self.project,
            self.stack,
            match_owner,
            match_collection,
            self.group_id,
            self.tile_id,
            q.group_id,
            q.tile_id
        )
    }
}

/// The viewer page address; the active trial lives in its `matchTrialId` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    url: Url,
}

impl PageLocation {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self { url: parse_url(raw)? })
    }

    pub fn trial_id(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == TRIAL_ID_PARAM)
            .map(|(_, v)| v.into_owned())
            .filter(|id| !id.is_empty())
    }

    pub fn with_trial_id(&self, trial_id: &str) -> Self {
        let mut url = self.url.clone();
        set_query_param(&mut url, TRIAL_ID_PARAM, trial_id);
        Self { url }
    }

    pub fn is_new_trial(&self) -> bool {
        self.trial_id().as_deref() == Some(NEW_TRIAL_ID)
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}
