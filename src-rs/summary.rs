//! Human readable description of a trial: what it was run with and what it found.

use serde::Serialize;

use crate::model::{MatchDerivationParameters, TrialParameters, TrialResult, TrialStats};
use crate::urls::render_parameters_link_name;
use crate::util::number_with_commas;

const AGGREGATED_CONSENSUS_SETS: &str = "AGGREGATED_CONSENSUS_SETS";

/// Deltas above this many pixels are flagged.
const HIGH_DELTA_PIXELS: f64 = 8.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialSummary {
    pub parameters: Vec<String>,
    pub features: Vec<String>,
    pub match_stats: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gd_match_stats: Option<Vec<String>>,
    pub elapsed: String,
}

impl TrialSummary {
    pub fn build(trial: &TrialResult, render_scale: f64) -> Self {
        let primary_filter = &trial
            .parameters
            .feature_and_match_parameters
            .match_derivation_parameters
            .match_filter;
        let mut stats = trial.stats.clone();
        backfill_aggregate_deviation(&mut stats, primary_filter);

        let mut parameters = parameter_lines(&trial.parameters);
        parameters.push(format!("Render Scale: {render_scale}"));

        let mut features = vec![
            feature_line("p", "feature", stats.p_feature_count, stats.p_feature_derivation_milliseconds),
            feature_line("q", "feature", stats.q_feature_count, stats.q_feature_derivation_milliseconds),
        ];

        let mut total_ms = stats.total_milliseconds();
        let gd_match_stats = trial.gd_stats.as_ref().map(|gd| {
            features.push(feature_line("p", "peak", gd.p_feature_count, gd.p_feature_derivation_milliseconds));
            features.push(feature_line("q", "peak", gd.q_feature_count, gd.q_feature_derivation_milliseconds));
            total_ms += gd.total_milliseconds();
            match_stats_lines(gd)
        });

        Self {
            parameters,
            features,
            match_stats: match_stats_lines(&stats),
            gd_match_stats,
            elapsed: format!("took {} ms to process", number_with_commas(total_ms)),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut out = self.parameters.clone();
        out.extend(self.features.iter().cloned());
        out.extend(self.match_stats.iter().cloned());
        if let Some(gd) = &self.gd_match_stats {
            out.push("Geometric descriptor matches:".to_string());
            out.extend(gd.iter().cloned());
        }
        out.push(self.elapsed.clone());
        out
    }
}

/// Older single-set trials were stored without an aggregate deviation; use the set's own.
pub fn backfill_aggregate_deviation(stats: &mut TrialStats, match_filter: &str) {
    if stats.aggregate_delta_x_standard_deviation.is_none()
        && match_filter != AGGREGATED_CONSENSUS_SETS
        && stats.consensus_set_delta_x_standard_deviations.len() == 1
    {
        stats.aggregate_delta_x_standard_deviation =
            stats.consensus_set_delta_x_standard_deviations.first().copied();
        stats.aggregate_delta_y_standard_deviation =
            stats.consensus_set_delta_y_standard_deviations.first().copied();
    }
}

fn feature_line(side: &str, kind: &str, count: u64, millis: u64) -> String {
    format!("{side}: {count} {kind}s were derived in {millis} ms")
}

pub fn delta_text(value: f64) -> String {
    if value > HIGH_DELTA_PIXELS {
        format!("{value:.1}!")
    } else {
        format!("{value:.1}")
    }
}

pub fn standard_deviation_text(axis: &str, aggregate: Option<f64>, per_set: &[f64]) -> String {
    let mut text = format!("Delta {axis} Standard Deviation:");
    if per_set.len() > 1 {
        if let Some(aggregate) = aggregate {
            text.push_str(&format!(" aggregate {},", delta_text(aggregate)));
        }
        let sets: Vec<String> = per_set.iter().map(|v| delta_text(*v)).collect();
        text.push_str(&format!(" sets [ {} ] pixels", sets.join(", ")));
    } else if let Some(aggregate) = aggregate {
        text.push_str(&format!(" {} pixels", delta_text(aggregate)));
    } else {
        text.push_str(" n/a");
    }
    text
}

pub fn coverage_text(coverage_pixels: Option<u64>, image_pixels: Option<u64>) -> Option<String> {
    let (coverage, total) = (coverage_pixels?, image_pixels?);
    if total == 0 {
        return None;
    }
    let percentage = (coverage as f64 / total as f64 * 100.0).round();
    Some(format!(
        "Overlapping Area Coverage: {} out of {} pixels ({percentage}%)",
        number_with_commas(coverage),
        number_with_commas(total)
    ))
}

pub fn consensus_text(sizes: &[u64]) -> String {
    match sizes {
        [0] => "NO matches were".to_string(),
        [size] => format!("1 consensus set with {size} matches was"),
        _ => {
            let listed: Vec<String> = sizes.iter().map(u64::to_string).collect();
            format!("{} consensus sets with [{}] matches were", sizes.len(), listed.join(","))
        }
    }
}

pub fn match_stats_lines(stats: &TrialStats) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{} derived in {} ms",
            consensus_text(&stats.consensus_set_sizes),
            stats.match_derivation_milliseconds
        ),
        standard_deviation_text(
            "X",
            stats.aggregate_delta_x_standard_deviation,
            &stats.consensus_set_delta_x_standard_deviations,
        ),
        standard_deviation_text(
            "Y",
            stats.aggregate_delta_y_standard_deviation,
            &stats.consensus_set_delta_y_standard_deviations,
        ),
    ];
    lines.extend(coverage_text(
        stats.overlapping_coverage_pixels,
        stats.overlapping_image_pixels,
    ));
    lines
}

fn match_derivation_line(label: &str, params: &MatchDerivationParameters, include_rod: bool) -> String {
    let mut fields = vec![format!("modelType {}", params.match_model_type)];
    if include_rod {
        if let Some(rod) = params.match_rod {
            fields.push(format!("rod {rod}"));
        }
    }
    fields.push(format!("iterations {}", params.match_iterations));
    fields.push(format!("maxEpsilon {}", params.match_max_epsilon));
    fields.push(format!("minInlierRatio {}", params.match_min_inlier_ratio));
    fields.push(format!("minNumInliers {}", params.match_min_num_inliers));
    if let Some(max_inliers) = params.match_max_num_inliers {
        fields.push(format!("maxNumInliers {max_inliers}"));
    }
    fields.push(format!("maxTrust {}", params.match_max_trust));
    fields.push(format!("filter {}", params.match_filter));
    if let Some(radius) = params.match_full_scale_coverage_radius {
        fields.push(format!("fullScaleCoverageRadius {radius}"));
    }
    if let Some((model, lambda)) = params.interpolated_model() {
        fields.push(format!("regularizerModelType {model}"));
        fields.push(format!("interpolatedModelLambda {lambda}"));
    }
    format!("{label}: {}", fields.join(", "))
}

pub fn parameter_lines(params: &TrialParameters) -> Vec<String> {
    let fm = &params.feature_and_match_parameters;
    let sift = &fm.sift_feature_parameters;
    let mut lines = vec![format!(
        "SIFT: fdSize {}, minScale {}, maxScale {}, steps {}",
        sift.fd_size, sift.min_scale, sift.max_scale, sift.steps
    )];
    if let (Some(position), Some(pixels)) = (&fm.p_clip_position, fm.clip_pixels) {
        lines.push(format!(
            "Clip Parameters: pRelativePosition {position}, clipPixels {pixels}"
        ));
    }
    lines.push(match_derivation_line("Match Derivation", &fm.match_derivation_parameters, true));
    if let Some(fill) = params.fill_with_noise {
        lines.push(format!("Fill With Noise: {fill}"));
    }
    lines.push(format!(
        "p: {}",
        render_parameters_link_name(&params.p_render_parameters_url)
    ));
    lines.push(format!(
        "q: {}",
        render_parameters_link_name(&params.q_render_parameters_url)
    ));

    if let Some(gdamp) = &params.geometric_descriptor_and_match_filter_parameters {
        let gd = &gdamp.geometric_descriptor_parameters;
        let mut fields = vec![
            format!("renderScale {}", gdamp.render_scale),
            format!("renderWithFilter {}", gdamp.render_with_filter),
        ];
        if let Some(name) = &gdamp.render_filter_list_name {
            fields.push(format!("renderFilterListName {name}"));
        }
        fields.extend([
            format!("similarOrientation {}", gd.similar_orientation),
            format!("numberOfNeighbors {}", gd.number_of_neighbors),
            format!("redundancy {}", gd.redundancy),
            format!("significance {}", gd.significance),
            format!("sigma {}", gd.sigma),
            format!("threshold {}", gd.threshold),
            format!("localization {}", gd.localization),
            format!("lookForMinima {}", gd.look_for_minima),
            format!("lookForMaxima {}", gd.look_for_maxima),
            format!("fullScaleBlockRadius {}", gd.full_scale_block_radius),
            format!(
                "fullScaleNonMaxSuppressionRadius {}",
                gd.full_scale_non_max_suppression_radius
            ),
            format!("storedMatchWeight {}", gd.gd_stored_match_weight),
        ]);
        lines.push(format!("Geometric Descriptor: {}", fields.join(", ")));
        lines.push(match_derivation_line(
            "Geometric Match Derivation",
            &gdamp.match_derivation_parameters,
            false,
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::trial_json;
    use serde_json::json;

    fn stats() -> TrialStats {
        let trial: TrialResult = serde_json::from_value(trial_json(json!([]))).unwrap();
        trial.stats
    }

    #[test]
    fn consensus_text_covers_empty_single_and_many() {
        assert_eq!(consensus_text(&[0]), "NO matches were");
        assert_eq!(consensus_text(&[42]), "1 consensus set with 42 matches was");
        assert_eq!(consensus_text(&[3, 5]), "2 consensus sets with [3,5] matches were");
    }

    #[test]
    fn high_deltas_are_flagged() {
        assert_eq!(delta_text(1.24), "1.2");
        assert_eq!(delta_text(8.0), "8.0");
        assert_eq!(delta_text(9.46), "9.5!");
    }

    #[test]
    fn standard_deviation_variants() {
        assert_eq!(
            standard_deviation_text("X", Some(2.0), &[1.0, 3.0]),
            "Delta X Standard Deviation: aggregate 2.0, sets [ 1.0, 3.0 ] pixels"
        );
        assert_eq!(
            standard_deviation_text("Y", Some(2.0), &[2.0]),
            "Delta Y Standard Deviation: 2.0 pixels"
        );
        assert_eq!(standard_deviation_text("Y", None, &[2.0]), "Delta Y Standard Deviation: n/a");
    }

    #[test]
    fn coverage_uses_grouped_numbers_and_rounded_percentage() {
        assert_eq!(
            coverage_text(Some(1234), Some(5678)).as_deref(),
            Some("Overlapping Area Coverage: 1,234 out of 5,678 pixels (22%)")
        );
        assert!(coverage_text(Some(1), None).is_none());
        assert!(coverage_text(Some(1), Some(0)).is_none());
    }

    #[test]
    fn single_set_aggregate_is_backfilled() {
        let mut s = stats();
        backfill_aggregate_deviation(&mut s, "SINGLE_SET");
        assert_eq!(s.aggregate_delta_x_standard_deviation, Some(1.25));
        assert_eq!(s.aggregate_delta_y_standard_deviation, Some(9.5));

        let mut aggregated = stats();
        backfill_aggregate_deviation(&mut aggregated, AGGREGATED_CONSENSUS_SETS);
        assert!(aggregated.aggregate_delta_x_standard_deviation.is_none());
    }

    #[test]
    fn summary_totals_elapsed_time_and_lists_parameters() {
        let trial: TrialResult = serde_json::from_value(trial_json(json!([]))).unwrap();
        let summary = TrialSummary::build(&trial, 0.6);
        assert_eq!(summary.elapsed, "took 265 ms to process");
        assert_eq!(summary.features[0], "p: 1500 features were derived in 120 ms");
        assert_eq!(summary.match_stats[0], "1 consensus set with 2 matches was derived in 35 ms");
        assert_eq!(summary.match_stats[2], "Delta Y Standard Deviation: 9.5! pixels");
        assert!(summary.parameters.contains(&"p: 151215054802105008.3717.0".to_string()));
        assert!(summary.parameters.contains(&"Render Scale: 0.6".to_string()));
        assert!(summary.parameters[1].contains("rod 0.92"));
        assert!(summary.gd_match_stats.is_none());
    }
}
