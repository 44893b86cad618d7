//! Editable trial request, the typed counterpart of the viewer's input form.
//!
//! `to_parameters` assembles a request the way a submitted form is read;
//! `from_parameters` fills a form from an existing trial so it can be tweaked and rerun.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrialError};
use crate::model::{
    FeatureAndMatchParameters, GeometricDescriptorAndMatchFilterParameters,
    GeometricDescriptorParameters, MatchDerivationParameters, SiftFeatureParameters,
    TrialParameters,
};
use crate::urls::is_render_parameters_url;

pub const NOT_INTERPOLATED: &str = "NOT INTERPOLATED";
pub const NO_CLIP: &str = "NO CLIP";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrialForm {
    pub p_render_parameters_url: String,
    pub q_render_parameters_url: String,
    pub fd_size: i64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub steps: i64,
    pub matching: MatchDerivationForm,
    pub p_clip_position: String,
    pub clip_pixels: i64,
    pub fill_with_noise: Option<bool>,
    pub include_geometric: bool,
    pub geometric: GeometricForm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchDerivationForm {
    pub model_type: String,
    pub regularizer_model_type: String,
    pub interpolated_model_lambda: Option<f64>,
    /// Only read for the primary derivation.
    pub rod: f64,
    pub iterations: i64,
    pub max_epsilon: f64,
    pub min_inlier_ratio: f64,
    pub min_num_inliers: i64,
    pub max_trust: f64,
    pub filter: String,
    pub full_scale_coverage_radius: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeometricForm {
    pub render_scale: f64,
    pub render_with_filter: bool,
    pub render_filter_list_name: String,
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
    pub stored_match_weight: f64,
    pub matching: MatchDerivationForm,
}

impl Default for TrialForm {
    fn default() -> Self {
        Self {
            p_render_parameters_url: String::new(),
            q_render_parameters_url: String::new(),
            fd_size: 8,
            min_scale: 0.25,
            max_scale: 1.0,
            steps: 5,
            matching: MatchDerivationForm::default(),
            p_clip_position: NO_CLIP.to_string(),
            clip_pixels: 0,
            fill_with_noise: None,
            include_geometric: false,
            geometric: GeometricForm::default(),
        }
    }
}

impl Default for MatchDerivationForm {
    fn default() -> Self {
        Self {
            model_type: "AFFINE".to_string(),
            regularizer_model_type: NOT_INTERPOLATED.to_string(),
            interpolated_model_lambda: None,
            rod: 0.92,
            iterations: 1000,
            max_epsilon: 20.0,
            min_inlier_ratio: 0.0,
            min_num_inliers: 10,
            max_trust: 3.0,
            filter: "SINGLE_SET".to_string(),
            full_scale_coverage_radius: None,
        }
    }
}

impl Default for GeometricForm {
    fn default() -> Self {
        Self {
            render_scale: 0.25,
            render_with_filter: true,
            render_filter_list_name: String::new(),
            number_of_neighbors: 3,
            redundancy: 1,
            significance: 2.0,
            sigma: 2.04,
            threshold: 0.008,
            localization: "THREE_D_QUADRATIC".to_string(),
            look_for_minima: true,
            look_for_maxima: false,
            similar_orientation: true,
            full_scale_block_radius: 300.0,
            full_scale_non_max_suppression_radius: 60.0,
            stored_match_weight: 0.4,
            matching: MatchDerivationForm::default(),
        }
    }
}

impl MatchDerivationForm {
    fn to_parameters(&self, include_rod: bool) -> MatchDerivationParameters {
        let lambda = self
            .interpolated_model_lambda
            .filter(|_| self.regularizer_model_type != NOT_INTERPOLATED);
        MatchDerivationParameters {
            match_model_type: self.model_type.clone(),
            match_iterations: self.iterations,
            match_max_epsilon: self.max_epsilon,
            match_min_inlier_ratio: self.min_inlier_ratio,
            match_min_num_inliers: self.min_num_inliers,
            match_max_trust: self.max_trust,
            match_filter: self.filter.clone(),
            match_max_num_inliers: None,
            match_full_scale_coverage_radius: self.full_scale_coverage_radius,
            match_regularizer_model_type: lambda.map(|_| self.regularizer_model_type.clone()),
            match_interpolated_model_lambda: lambda,
            match_rod: include_rod.then_some(self.rod),
        }
    }

    fn populate(&mut self, params: &MatchDerivationParameters, include_rod: bool) {
        self.model_type = params.match_model_type.clone();
        if let Some((model, lambda)) = params.interpolated_model() {
            if model != NOT_INTERPOLATED {
                self.regularizer_model_type = model.to_string();
                self.interpolated_model_lambda = Some(lambda);
            }
        }
        if include_rod {
            if let Some(rod) = params.match_rod {
                self.rod = rod;
            }
        }
        self.iterations = params.match_iterations;
        self.max_epsilon = params.match_max_epsilon;
        self.min_inlier_ratio = params.match_min_inlier_ratio;
        self.min_num_inliers = params.match_min_num_inliers;
        self.max_trust = params.match_max_trust;
        self.filter = params.match_filter.clone();
        self.full_scale_coverage_radius = params.match_full_scale_coverage_radius;
    }
}

impl TrialForm {
    /// Builds a create request; both tiles must be given as render parameters URLs.
    pub fn to_parameters(&self) -> Result<TrialParameters> {
        let p_url = self.p_render_parameters_url.trim();
        let q_url = self.q_render_parameters_url.trim();
        if !(is_render_parameters_url(p_url) && is_render_parameters_url(q_url)) {
            return Err(TrialError::validation(
                "render parameters URLs must contain \"render-parameters\"",
            ));
        }

        let clipped = self.p_clip_position != NO_CLIP && !self.p_clip_position.is_empty();
        let feature_and_match_parameters = FeatureAndMatchParameters {
            sift_feature_parameters: SiftFeatureParameters {
                fd_size: self.fd_size,
                min_scale: self.min_scale,
                max_scale: self.max_scale,
                steps: self.steps,
            },
            match_derivation_parameters: self.matching.to_parameters(true),
            p_clip_position: clipped.then(|| self.p_clip_position.clone()),
            clip_pixels: clipped.then_some(self.clip_pixels),
        };

        let geometric = self.include_geometric.then(|| {
            let gd = &self.geometric;
            let filter_list_name = gd.render_filter_list_name.trim();
            GeometricDescriptorAndMatchFilterParameters {
                geometric_descriptor_parameters: GeometricDescriptorParameters {
                    number_of_neighbors: gd.number_of_neighbors,
                    redundancy: gd.redundancy,
                    significance: gd.significance,
                    sigma: gd.sigma,
                    threshold: gd.threshold,
                    localization: gd.localization.clone(),
                    look_for_minima: gd.look_for_minima,
                    look_for_maxima: gd.look_for_maxima,
                    similar_orientation: gd.similar_orientation,
                    full_scale_block_radius: gd.full_scale_block_radius,
                    full_scale_non_max_suppression_radius: gd.full_scale_non_max_suppression_radius,
                    gd_stored_match_weight: gd.stored_match_weight,
                },
                match_derivation_parameters: gd.matching.to_parameters(false),
                render_scale: gd.render_scale,
                render_with_filter: gd.render_with_filter,
                render_filter_list_name: (!filter_list_name.is_empty())
                    .then(|| filter_list_name.to_string()),
            }
        });

        Ok(TrialParameters {
            feature_and_match_parameters,
            p_render_parameters_url: p_url.to_string(),
            q_render_parameters_url: q_url.to_string(),
            fill_with_noise: self.fill_with_noise,
            geometric_descriptor_and_match_filter_parameters: geometric,
        })
    }

    /// A form pre-filled from an existing trial's parameters.
    pub fn from_parameters(parameters: &TrialParameters) -> Self {
        let mut form = Self::default();
        let fm = &parameters.feature_and_match_parameters;
        form.fd_size = fm.sift_feature_parameters.fd_size;
        form.min_scale = fm.sift_feature_parameters.min_scale;
        form.max_scale = fm.sift_feature_parameters.max_scale;
        form.steps = fm.sift_feature_parameters.steps;
        form.matching.populate(&fm.match_derivation_parameters, true);
        form.fill_with_noise = parameters.fill_with_noise;

        if let Some(position) = fm.p_clip_position.as_deref().filter(|p| *p != NO_CLIP) {
            form.p_clip_position = position.to_string();
            if let Some(pixels) = fm.clip_pixels {
                form.clip_pixels = pixels;
            }
        }

        form.p_render_parameters_url = parameters.p_render_parameters_url.clone();
        form.q_render_parameters_url = parameters.q_render_parameters_url.clone();

        if let Some(gdamp) = &parameters.geometric_descriptor_and_match_filter_parameters {
            let gd = &mut form.geometric;
            let gdp = &gdamp.geometric_descriptor_parameters;
            gd.render_scale = gdamp.render_scale;
            gd.render_with_filter = gdamp.render_with_filter;
            if let Some(name) = &gdamp.render_filter_list_name {
                gd.render_filter_list_name = name.clone();
            }
            gd.number_of_neighbors = gdp.number_of_neighbors;
            gd.redundancy = gdp.redundancy;
            gd.significance = gdp.significance;
            gd.sigma = gdp.sigma;
            gd.threshold = gdp.threshold;
            gd.localization = gdp.localization.clone();
            gd.look_for_minima = gdp.look_for_minima;
            gd.look_for_maxima = gdp.look_for_maxima;
            gd.similar_orientation = gdp.similar_orientation;
            gd.full_scale_block_radius = gdp.full_scale_block_radius;
            gd.full_scale_non_max_suppression_radius = gdp.full_scale_non_max_suppression_radius;
            gd.stored_match_weight = gdp.gd_stored_match_weight;
            gd.matching.populate(&gdamp.match_derivation_parameters, false);
            form.include_geometric = true;
        }

        form
    }
}
