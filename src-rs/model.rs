//! Wire types for the match trial service.
//!
//! Field names follow the service's camelCase JSON. Optional fields are skipped
//! on output so that a round trip through the viewer never invents values the
//! service did not send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrialError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialParameters {
    pub feature_and_match_parameters: FeatureAndMatchParameters,
    pub p_render_parameters_url: String,
    pub q_render_parameters_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_with_noise: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometric_descriptor_and_match_filter_parameters:
        Option<GeometricDescriptorAndMatchFilterParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureAndMatchParameters {
    pub sift_feature_parameters: SiftFeatureParameters,
    pub match_derivation_parameters: MatchDerivationParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_clip_position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_pixels: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiftFeatureParameters {
    pub fd_size: i64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub steps: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDerivationParameters {
    pub match_model_type: String,
    pub match_iterations: i64,
    pub match_max_epsilon: f64,
    pub match_min_inlier_ratio: f64,
    pub match_min_num_inliers: i64,
    pub match_max_trust: f64,
    pub match_filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_max_num_inliers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_full_scale_coverage_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_regularizer_model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_interpolated_model_lambda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_rod: Option<f64>,
}

impl MatchDerivationParameters {
    /// Regularizer and lambda, only when both are set.
    pub fn interpolated_model(&self) -> Option<(&str, f64)> {
        match (
            self.match_regularizer_model_type.as_deref(),
            self.match_interpolated_model_lambda,
        ) {
            (Some(model), Some(lambda)) => Some((model, lambda)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometricDescriptorAndMatchFilterParameters {
    pub geometric_descriptor_parameters: GeometricDescriptorParameters,
    pub match_derivation_parameters: MatchDerivationParameters,
    pub render_scale: f64,
    pub render_with_filter: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_filter_list_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometricDescriptorParameters {
    pub number_of_neighbors: i64,
    pub redundancy: i64,
    pub significance: f64,
    pub sigma: f64,
    pub threshold: f64,
    pub localization: String,
    pub look_for_minima: bool,
    pub look_for_maxima: bool,
    pub similar_orientation: bool,
    pub full_scale_block_radius: f64,
    pub full_scale_non_max_suppression_radius: f64,
    pub gd_stored_match_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStats {
    pub p_feature_count: u64,
    pub p_feature_derivation_milliseconds: u64,
    pub q_feature_count: u64,
    pub q_feature_derivation_milliseconds: u64,
    #[serde(default)]
    pub consensus_set_sizes: Vec<u64>,
    pub match_derivation_milliseconds: u64,
    #[serde(default)]
    pub consensus_set_delta_x_standard_deviations: Vec<f64>,
    #[serde(default)]
    pub consensus_set_delta_y_standard_deviations: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_delta_x_standard_deviation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_delta_y_standard_deviation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlapping_coverage_pixels: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlapping_image_pixels: Option<u64>,
}

impl TrialStats {
    pub fn total_milliseconds(&self) -> u64 {
        self.p_feature_derivation_milliseconds
            + self.q_feature_derivation_milliseconds
            + self.match_derivation_milliseconds
    }
}

/// One consensus set: parallel coordinate rows plus weights.
///
/// `p[0]`/`p[1]` hold x/y in the p tile's full-scale pixel space; `q` likewise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSetMatches {
    pub p: [Vec<f64>; 2],
    pub q: [Vec<f64>; 2],
    pub w: Vec<f64>,
}

impl ConsensusSetMatches {
    pub fn len(&self) -> usize {
        self.w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    pub fn p_point(&self, index: usize) -> (f64, f64) {
        (self.p[0][index], self.p[1][index])
    }

    pub fn q_point(&self, index: usize) -> (f64, f64) {
        (self.q[0][index], self.q[1][index])
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.w.len();
        self.p[0].len() == n && self.p[1].len() == n && self.q[0].len() == n && self.q[1].len() == n
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub parameters: TrialParameters,
    pub stats: TrialStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gd_stats: Option<TrialStats>,
    #[serde(default)]
    pub matches: Vec<ConsensusSetMatches>,
}

impl TrialResult {
    pub fn from_json(raw: &str) -> Result<Self> {
        let result: Self = serde_json::from_str(raw).map_err(|err| TrialError::Decode {
            what: "match trial".to_string(),
            message: err.to_string(),
        })?;
        result.validate()?;
        Ok(result)
    }

    pub fn validate(&self) -> Result<()> {
        for (index, set) in self.matches.iter().enumerate() {
            if !set.is_consistent() {
                return Err(TrialError::Decode {
                    what: "match trial".to_string(),
                    message: format!(
                        "consensus set {index} has mismatched p/q/w lengths ({}, {}, {}, {}, {})",
                        set.p[0].len(),
                        set.p[1].len(),
                        set.q[0].len(),
                        set.q[1].len(),
                        set.w.len()
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn match_count(&self) -> usize {
        self.matches.iter().map(ConsensusSetMatches::len).sum()
    }

    pub fn consensus_set_sizes(&self) -> Vec<usize> {
        self.matches.iter().map(ConsensusSetMatches::len).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTrial {
    pub id: String,
}

/// One tile pair's matches as stored in a match collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasMatches {
    pub p_group_id: String,
    pub p_id: String,
    pub q_group_id: String,
    pub q_id: String,
    pub matches: Value,
}
