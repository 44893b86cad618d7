/// Index of the highlighted correspondence when none has been picked yet.
pub const NO_SELECTION: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationState {
    pub match_index: i64,
    /// Sum of all consensus set sizes; `None` until a trial is loaded.
    pub match_count: Option<usize>,
    pub draw_match_lines: bool,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            match_index: 0,
            match_count: None,
            draw_match_lines: false,
        }
    }
}

impl NavigationState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Moves the highlight by `delta`, wrapping into `[0, match_count)`.
    ///
    /// Returns the new index, or `None` when there is nothing to select.
    pub fn advance(&mut self, delta: i64) -> Option<usize> {
        let count = self.match_count.filter(|&count| count > 0)? as i64;
        // both terms are reduced first so the sum cannot overflow
        self.match_index = (self.match_index.rem_euclid(count) + delta.rem_euclid(count)).rem_euclid(count);
        Some(self.match_index as usize)
    }

    pub fn toggle_lines(&mut self) -> bool {
        self.draw_match_lines = !self.draw_match_lines;
        self.draw_match_lines
    }
}

/// Finds the consensus set owning `global_index`, and the index within it.
///
/// Sets are walked in order with a running offset; the first set whose
/// cumulative size exceeds the index owns it.
pub fn locate_match(set_sizes: &[usize], global_index: usize) -> Option<(usize, usize)> {
    let mut offset = 0usize;
    for (set_index, &size) in set_sizes.iter().enumerate() {
        if global_index < offset + size {
            return Some((set_index, global_index - offset));
        }
        offset += size;
    }
    None
}
