//! Paints the two positioned cells and their correspondences onto a canvas.

use image::{Rgba, RgbaImage};

use crate::cell::ImageCell;
use crate::draw::{draw_circle, draw_line, parse_color};
use crate::model::ConsensusSetMatches;
use crate::navigation::locate_match;

pub const MATCH_RADIUS: f64 = 3.0;
pub const SELECTED_MATCH_COLOR: &str = "#00ff00";

/// Per-correspondence colors when the trial has a single consensus set.
pub const SINGLE_SET_COLORS: [&str; 4] = ["#00ff00", "#f48342", "#42eef4", "#f442f1"];

/// Per-set colors when the trial has several consensus sets.
pub const CONSENSUS_SET_COLORS: [&str; 15] = [
    "#4363d8", "#e6194b", "#3cb44b", "#ffe119", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#800000", "#aaffc3",
];

const FALLBACK_COLOR: [u8; 4] = [0, 255, 0, 255];

/// Color for one correspondence when all matches are drawn.
pub fn all_matches_color(set_count: usize, set_index: usize, match_index: usize) -> &'static str {
    if set_count == 1 {
        SINGLE_SET_COLORS[match_index % SINGLE_SET_COLORS.len()]
    } else {
        CONSENSUS_SET_COLORS[set_index % CONSENSUS_SET_COLORS.len()]
    }
}

/// Canvas dimensions for a pair of positioned cells.
pub fn canvas_size(p: &ImageCell, q: &ImageCell, cell_margin: u32) -> (u32, u32) {
    let width = q.origin().0 + q.natural_width() + cell_margin;
    let height = cell_margin + p.natural_height().max(q.natural_height());
    (width, height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStyle {
    Points,
    Lines,
}

impl MatchStyle {
    pub fn from_lines_flag(draw_match_lines: bool) -> Self {
        if draw_match_lines {
            Self::Lines
        } else {
            Self::Points
        }
    }
}

pub struct CorrespondenceRenderer<'a> {
    p: &'a ImageCell,
    q: &'a ImageCell,
    cell_margin: u32,
    style: MatchStyle,
}

impl<'a> CorrespondenceRenderer<'a> {
    /// `None` until both cells are positioned.
    pub fn new(p: &'a ImageCell, q: &'a ImageCell, cell_margin: u32, style: MatchStyle) -> Option<Self> {
        if !(p.is_positioned() && q.is_positioned()) {
            return None;
        }
        Some(Self {
            p,
            q,
            cell_margin,
            style,
        })
    }

    /// A freshly sized canvas with both tile images painted.
    pub fn base_canvas(&self) -> RgbaImage {
        let (width, height) = canvas_size(self.p, self.q, self.cell_margin);
        let mut canvas = RgbaImage::new(width, height);
        self.p.draw_loaded_image(&mut canvas);
        self.q.draw_loaded_image(&mut canvas);
        canvas
    }

    pub fn draw_match(
        &self,
        canvas: &mut RgbaImage,
        set: &ConsensusSetMatches,
        index: usize,
        color: Rgba<u8>,
    ) {
        let (px, py) = self.p.to_screen(set.p_point(index));
        let (qx, qy) = self.q.to_screen(set.q_point(index));
        match self.style {
            MatchStyle::Lines => draw_line(canvas, px, py, qx, qy, color),
            MatchStyle::Points => {
                draw_circle(canvas, px, py, MATCH_RADIUS, color);
                draw_circle(canvas, qx, qy, MATCH_RADIUS, color);
            }
        }
    }

    pub fn draw_all(&self, canvas: &mut RgbaImage, sets: &[ConsensusSetMatches]) {
        for (set_index, set) in sets.iter().enumerate() {
            for index in 0..set.len() {
                let color = parse_color(all_matches_color(sets.len(), set_index, index), FALLBACK_COLOR);
                self.draw_match(canvas, set, index, color);
            }
        }
    }

    /// Draws the correspondence at `global_index` across all sets; false when out of range.
    pub fn draw_selected(&self, canvas: &mut RgbaImage, sets: &[ConsensusSetMatches], global_index: usize) -> bool {
        let sizes: Vec<usize> = sets.iter().map(ConsensusSetMatches::len).collect();
        let Some((set_index, local_index)) = locate_match(&sizes, global_index) else {
            return false;
        };
        let color = parse_color(SELECTED_MATCH_COLOR, FALLBACK_COLOR);
        self.draw_match(canvas, &sets[set_index], local_index, color);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Side;

    const P_URL: &str = "http://host/render-ws/v1/owner/o/project/p/stack/s/tile/1.2.0/render-parameters";
    const Q_URL: &str = "http://host/render-ws/v1/owner/o/project/p/stack/s/tile/1.3.0/render-parameters";

    fn cells(p_size: (u32, u32), q_size: (u32, u32), scale: f64) -> (ImageCell, ImageCell) {
        let mut p = ImageCell::new(Side::P, P_URL, 0, 0, scale, 4).unwrap();
        let mut q = ImageCell::new(Side::Q, Q_URL, 0, 1, scale, 4).unwrap();
        p.complete_load(Ok(RgbaImage::from_pixel(p_size.0, p_size.1, Rgba([0, 0, 0, 255]))));
        q.complete_load(Ok(RgbaImage::from_pixel(q_size.0, q_size.1, Rgba([0, 0, 0, 255]))));
        (p, q)
    }

    fn set(p: [Vec<f64>; 2], q: [Vec<f64>; 2]) -> ConsensusSetMatches {
        let w = vec![1.0; p[0].len()];
        ConsensusSetMatches { p, q, w }
    }

    #[test]
    fn single_set_cycles_four_colors_by_match() {
        assert_eq!(all_matches_color(1, 0, 0), "#00ff00");
        assert_eq!(all_matches_color(1, 0, 5), "#f48342");
    }

    #[test]
    fn multiple_sets_color_by_set_index() {
        assert_eq!(all_matches_color(3, 0, 7), "#4363d8");
        assert_eq!(all_matches_color(3, 1, 0), "#e6194b");
        assert_eq!(all_matches_color(20, 16, 0), "#e6194b");
    }

    #[test]
    fn canvas_fits_both_cells() {
        let (p, q) = cells((40, 30), (50, 60), 0.2);
        let (width, height) = canvas_size(&p, &q, 4);
        assert_eq!(q.origin(), (58, 4));
        assert_eq!(width, 58 + 50 + 4);
        assert_eq!(height, 64);
        assert!(height >= p.natural_height().max(q.natural_height()) + 4);
    }

    #[test]
    fn renderer_waits_for_both_cells() {
        let p = ImageCell::new(Side::P, P_URL, 0, 0, 0.2, 4).unwrap();
        let (_, q) = cells((10, 10), (10, 10), 0.2);
        assert!(CorrespondenceRenderer::new(&p, &q, 4, MatchStyle::Points).is_none());
    }

    #[test]
    fn points_are_circled_on_both_tiles() {
        let (p, q) = cells((40, 40), (40, 40), 0.5);
        let renderer = CorrespondenceRenderer::new(&p, &q, 4, MatchStyle::Points).unwrap();
        let mut canvas = renderer.base_canvas();
        renderer.draw_all(&mut canvas, &[set([vec![20.0], vec![20.0]], [vec![40.0], vec![20.0]])]);
        // p center (14, 14), q center (48 + 20, 14)
        let green = Rgba([0, 255, 0, 255]);
        assert_eq!(*canvas.get_pixel(17, 14), green);
        assert_eq!(*canvas.get_pixel(71, 14), green);
        assert_ne!(*canvas.get_pixel(14, 14), green);
    }

    #[test]
    fn lines_join_p_and_q_points() {
        let (p, q) = cells((40, 40), (40, 40), 0.5);
        let renderer = CorrespondenceRenderer::new(&p, &q, 4, MatchStyle::Lines).unwrap();
        let mut canvas = renderer.base_canvas();
        renderer.draw_all(&mut canvas, &[set([vec![20.0], vec![20.0]], [vec![40.0], vec![20.0]])]);
        let green = Rgba([0, 255, 0, 255]);
        for x in 14..=68 {
            assert_eq!(*canvas.get_pixel(x, 14), green);
        }
    }

    #[test]
    fn selected_match_resolves_across_sets() {
        let (p, q) = cells((100, 100), (100, 100), 1.0);
        let renderer = CorrespondenceRenderer::new(&p, &q, 4, MatchStyle::Lines).unwrap();
        let first = set([vec![1.0, 2.0, 3.0], vec![1.0, 1.0, 1.0]], [vec![1.0, 2.0, 3.0], vec![1.0, 1.0, 1.0]]);
        let second = set(
            [vec![10.0, 50.0, 10.0, 10.0, 10.0], vec![10.0, 50.0, 10.0, 10.0, 10.0]],
            [vec![10.0, 50.0, 10.0, 10.0, 10.0], vec![10.0, 50.0, 10.0, 10.0, 10.0]],
        );
        let mut canvas = renderer.base_canvas();
        assert!(renderer.draw_selected(&mut canvas, &[first.clone(), second.clone()], 4));
        let green = Rgba([0, 255, 0, 255]);
        // local index 1 of the second set: p (54, 54) -> q (158, 54)
        assert_eq!(*canvas.get_pixel(54, 54), green);
        assert_eq!(*canvas.get_pixel(158, 54), green);
        assert_ne!(*canvas.get_pixel(14, 14), green);
        assert!(!renderer.draw_selected(&mut canvas, &[first, second], 8));
    }
}
