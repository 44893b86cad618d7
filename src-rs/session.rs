//! One displayed match trial: its two image cells, the fetched result, the
//! canvas, and every user action that reads or changes them.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;

use image::RgbaImage;
use tracing::{debug, error, info, warn};

use crate::cell::{CellEvent, CellState, ImageCell, Side};
use crate::client::{ImageSource, MatchTrialService};
use crate::config::ViewerConfig;
use crate::error::{Result, TrialError};
use crate::form::TrialForm;
use crate::handoff::{push_trial_parameters, trial_window_channel, HandoffOutcome, RetryPolicy, TrialWindowEndpoint};
use crate::model::{CanvasMatches, TrialResult};
use crate::navigation::{NavigationState, NO_SELECTION};
use crate::render::{CorrespondenceRenderer, MatchStyle};
use crate::summary::TrialSummary;
use crate::urls::{PageLocation, TilePath};
use crate::util::id_suffix;

const TRIAL_ID_SUFFIX_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Loading,
    Loaded,
    Failed,
}

#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    /// At least one cell is not positioned yet.
    Deferred,
    NotLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawRequest {
    AllMatches,
    SelectedMatch(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMatchPair {
    pub tile_pair_url: String,
    pub message: String,
}

pub struct TrialSession<S> {
    service: S,
    images: Arc<dyn ImageSource>,
    config: ViewerConfig,
    page: PageLocation,
    state: SessionState,
    generation: u64,
    trial_id: Option<String>,
    trial_label: String,
    result: Option<TrialResult>,
    cells: Option<(ImageCell, ImageCell)>,
    nav: NavigationState,
    canvas: Option<RgbaImage>,
    match_info: String,
    deleted: bool,
    run_trial_enabled: bool,
    trial_running: bool,
    events_tx: Sender<CellEvent>,
    events_rx: Receiver<CellEvent>,
}

impl<S: MatchTrialService> TrialSession<S> {
    pub fn new(service: S, images: Arc<dyn ImageSource>, config: ViewerConfig, page: PageLocation) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            service,
            images,
            config,
            page,
            state: SessionState::Empty,
            generation: 0,
            trial_id: None,
            trial_label: String::new(),
            result: None,
            cells: None,
            nav: NavigationState::default(),
            canvas: None,
            match_info: String::new(),
            deleted: false,
            run_trial_enabled: true,
            trial_running: false,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn page(&self) -> &PageLocation {
        &self.page
    }

    pub fn trial_id(&self) -> Option<&str> {
        self.trial_id.as_deref()
    }

    /// Short id shown next to the trial, with a deleted marker once deleted.
    pub fn trial_label(&self) -> &str {
        &self.trial_label
    }

    pub fn result(&self) -> Option<&TrialResult> {
        self.result.as_ref()
    }

    pub fn navigation(&self) -> &NavigationState {
        &self.nav
    }

    pub fn canvas(&self) -> Option<&RgbaImage> {
        self.canvas.as_ref()
    }

    pub fn match_info(&self) -> &str {
        &self.match_info
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn can_delete(&self) -> bool {
        self.state == SessionState::Loaded && !self.deleted
    }

    pub fn run_trial_enabled(&self) -> bool {
        self.run_trial_enabled
    }

    pub fn is_trial_running(&self) -> bool {
        self.trial_running
    }

    pub fn cell(&self, side: Side) -> Option<&ImageCell> {
        self.cells.as_ref().map(|(p, q)| match side {
            Side::P => p,
            Side::Q => q,
        })
    }

    /// Moves to `page` and loads the trial it names, unless it is a new trial page.
    pub fn navigate(&mut self, page: PageLocation) -> SessionState {
        self.page = page;
        match self.page.trial_id() {
            Some(trial_id) if !self.page.is_new_trial() => self.load_trial(&trial_id),
            _ => {
                self.clear();
                self.state
            }
        }
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.state = SessionState::Empty;
        self.trial_id = None;
        self.trial_label.clear();
        self.result = None;
        self.cells = None;
        self.nav.reset();
        self.canvas = None;
        self.match_info.clear();
        self.deleted = false;
        self.run_trial_enabled = true;
        self.trial_running = false;
    }

    /// Fetches a trial and starts loading both tile images.
    ///
    /// A failed fetch is logged and leaves the session without a result.
    pub fn load_trial(&mut self, trial_id: &str) -> SessionState {
        self.clear();
        self.state = SessionState::Loading;
        self.trial_id = Some(trial_id.to_string());
        self.trial_label = id_suffix(trial_id, TRIAL_ID_SUFFIX_LEN).to_string();

        let result = match self.service.fetch_trial(trial_id) {
            Ok(result) => result,
            Err(err) => {
                warn!(trial_id, error = %err, "failed to load match trial");
                self.state = SessionState::Failed;
                return self.state;
            }
        };

        let view_scale = self.config.effective_view_scale();
        let margin = self.config.cell_margin;
        let parameters = &result.parameters;
        let cells = ImageCell::new(Side::P, &parameters.p_render_parameters_url, 0, 0, view_scale, margin)
            .and_then(|p| {
                ImageCell::new(Side::Q, &parameters.q_render_parameters_url, 0, 1, view_scale, margin)
                    .map(|q| (p, q))
            });
        let (mut p, mut q) = match cells {
            Ok(cells) => cells,
            Err(err) => {
                warn!(trial_id, error = %err, "match trial has unusable render parameters URLs");
                self.state = SessionState::Failed;
                return self.state;
            }
        };

        p.load_image(Arc::clone(&self.images), self.events_tx.clone(), self.generation);
        q.load_image(Arc::clone(&self.images), self.events_tx.clone(), self.generation);

        self.nav.match_count = Some(result.match_count());
        info!(
            trial_id,
            consensus_sets = result.matches.len(),
            matches = result.match_count(),
            "loaded match trial"
        );
        self.cells = Some((p, q));
        self.result = Some(result);
        self.state = SessionState::Loaded;
        self.state
    }

    fn apply_event(&mut self, event: CellEvent) {
        if event.generation != self.generation {
            debug!(
                generation = event.generation,
                current = self.generation,
                side = %event.side,
                "dropping image load from a superseded trial"
            );
            return;
        }
        if let Some((p, q)) = self.cells.as_mut() {
            let cell = match event.side {
                Side::P => p,
                Side::Q => q,
            };
            cell.complete_load(event.outcome);
        }
    }

    /// Applies every image load that has already finished. Returns how many were received.
    pub fn pump_events(&mut self) -> usize {
        let mut received = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event);
            received += 1;
        }
        received
    }

    fn cells_positioned(&self) -> bool {
        self.cells
            .as_ref()
            .is_some_and(|(p, q)| p.is_positioned() && q.is_positioned())
    }

    fn any_cell_failed(&self) -> bool {
        self.cells
            .as_ref()
            .is_some_and(|(p, q)| p.state() == CellState::Failed || q.state() == CellState::Failed)
    }

    fn renderer(&self) -> Option<CorrespondenceRenderer<'_>> {
        let (p, q) = self.cells.as_ref()?;
        CorrespondenceRenderer::new(
            p,
            q,
            self.config.cell_margin,
            MatchStyle::from_lines_flag(self.nav.draw_match_lines),
        )
    }

    /// Paints every correspondence, colored per consensus set.
    pub fn draw_all_matches(&mut self) -> DrawOutcome {
        self.pump_events();
        let Some(result) = self.result.as_ref() else {
            return DrawOutcome::NotLoaded;
        };
        let Some(renderer) = self.renderer() else {
            return DrawOutcome::Deferred;
        };
        let mut canvas = renderer.base_canvas();
        let match_count = result.match_count();
        if match_count > 0 {
            renderer.draw_all(&mut canvas, &result.matches);
            self.match_info = format!("{match_count} total matches");
        }
        self.nav.match_index = 0;
        self.canvas = Some(canvas);
        DrawOutcome::Drawn
    }

    /// Steps the highlighted correspondence by `delta`, wrapping, and paints only it.
    ///
    /// A deferred draw leaves the selection where it was.
    pub fn draw_selected_matches(&mut self, delta: i64) -> DrawOutcome {
        self.pump_events();
        let Some(result) = self.result.as_ref() else {
            return DrawOutcome::NotLoaded;
        };
        let Some(renderer) = self.renderer() else {
            return DrawOutcome::Deferred;
        };
        let mut canvas = renderer.base_canvas();
        let mut match_info = None;
        let mut nav = self.nav;
        if let Some(index) = nav.advance(delta) {
            renderer.draw_selected(&mut canvas, &result.matches, index);
            match_info = Some(format!("match {} of {}", index + 1, result.match_count()));
        }
        self.nav = nav;
        if let Some(match_info) = match_info {
            self.match_info = match_info;
        }
        self.canvas = Some(canvas);
        DrawOutcome::Drawn
    }

    pub fn draw(&mut self, request: DrawRequest) -> DrawOutcome {
        match request {
            DrawRequest::AllMatches => self.draw_all_matches(),
            DrawRequest::SelectedMatch(delta) => self.draw_selected_matches(delta),
        }
    }

    /// Retries `request` once per poll interval as image loads arrive.
    ///
    /// Gives up after the configured number of polls, or as soon as a cell has failed
    /// since a failed cell never becomes positioned.
    pub fn draw_when_ready(&mut self, request: DrawRequest) -> DrawOutcome {
        let poll = self.config.draw_poll_interval();
        for _ in 0..=self.config.draw_wait_polls {
            let outcome = self.draw(request);
            if outcome != DrawOutcome::Deferred {
                return outcome;
            }
            if self.any_cell_failed() {
                warn!(trial_id = ?self.trial_id, "a tile image failed to load, not drawing matches");
                return outcome;
            }
            match self.events_rx.recv_timeout(poll) {
                Ok(event) => self.apply_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                // the session holds a sender, so this cannot happen while it lives
                Err(RecvTimeoutError::Disconnected) => return outcome,
            }
        }
        if !self.cells_positioned() {
            warn!(trial_id = ?self.trial_id, "gave up waiting for tile images");
        }
        DrawOutcome::Deferred
    }

    /// Switches between point and line markers and redraws all matches once the
    /// tile images are in.
    ///
    /// Returns the label for switching back, and how the redraw went.
    pub fn toggle_lines_and_points(&mut self) -> (&'static str, DrawOutcome) {
        let lines = self.nav.toggle_lines();
        let outcome = self.draw_when_ready(DrawRequest::AllMatches);
        let label = if lines { "Points" } else { "Lines" };
        (label, outcome)
    }

    /// Starts the highlight from "nothing selected", so the next step of `n` lands on match `n`.
    pub fn clear_selection(&mut self) {
        self.nav.match_index = NO_SELECTION;
    }

    /// Request that highlights match `position`: 1-based from the first match,
    /// or counting back from the last one when not positive (`-1` is the last).
    pub fn jump_to(&mut self, position: i64) -> DrawRequest {
        if position > 0 {
            self.clear_selection();
        } else {
            self.nav.match_index = 0;
        }
        DrawRequest::SelectedMatch(position)
    }

    /// Deletes the displayed trial. The result stays on screen.
    ///
    /// Returns whether the service accepted the delete; failures are only logged.
    pub fn delete_trial(&mut self) -> bool {
        if !self.can_delete() {
            return false;
        }
        let Some(trial_id) = self.trial_id.clone() else {
            return false;
        };
        match self.service.delete_trial(&trial_id) {
            Ok(()) => {
                self.deleted = true;
                self.trial_label = format!("{} DELETED", id_suffix(&trial_id, TRIAL_ID_SUFFIX_LEN));
                info!(trial_id, "deleted match trial");
                true
            }
            Err(err) => {
                warn!(trial_id, error = %err, "failed to delete match trial");
                false
            }
        }
    }

    /// Submits a new trial built from `form` and points the page at it.
    ///
    /// The caller follows up with [`TrialSession::navigate`] to show the new trial.
    pub fn run_trial(&mut self, form: &TrialForm) -> Result<String> {
        let parameters = form.to_parameters()?;
        self.run_trial_enabled = false;
        self.trial_running = true;
        let created = self.service.create_trial(&parameters);
        self.trial_running = false;
        match created {
            Ok(trial_id) => {
                info!(%trial_id, "created match trial");
                self.page = self.page.with_trial_id(&trial_id);
                Ok(trial_id)
            }
            Err(err) => {
                error!(error = %err, "failed to create match trial");
                self.run_trial_enabled = true;
                Err(err)
            }
        }
    }

    /// Stores the trial's single consensus set as a match pair in a collection.
    pub fn save_trial_results_to_collection(&self, owner: &str, collection: &str) -> Result<SavedMatchPair> {
        if collection.is_empty() {
            return Err(TrialError::validation(
                "saving requires a match collection name",
            ));
        }
        let Some(result) = self.result.as_ref() else {
            return Err(TrialError::validation("no match trial is loaded"));
        };
        let [matches] = result.matches.as_slice() else {
            return Err(TrialError::validation(
                "trial must have one and only one set of matches to save",
            ));
        };
        let p = TilePath::parse(&result.parameters.p_render_parameters_url);
        let q = TilePath::parse(&result.parameters.q_render_parameters_url);
        let (Some(p), Some(q)) = (p, q) else {
            return Err(TrialError::validation(
                "cannot parse render URL(s) for this match trial",
            ));
        };

        let pair = CanvasMatches {
            p_group_id: p.group_id.clone(),
            p_id: p.tile_id.clone(),
            q_group_id: q.group_id.clone(),
            q_id: q.tile_id.clone(),
            matches: serde_json::to_value(matches).map_err(|err| TrialError::Decode {
                what: "consensus set".to_string(),
                message: err.to_string(),
            })?,
        };
        if let Err(err) = self.service.save_matches(owner, collection, &[pair]) {
            error!(owner, collection, error = %err, "failed to save match pair");
            return Err(err);
        }
        info!(owner, collection, p_id = %p.tile_id, q_id = %q.tile_id, "saved match pair");
        Ok(SavedMatchPair {
            tile_pair_url: p.tile_pair_view_url(&q, owner, collection),
            message: format!("saved match pair to {collection}"),
        })
    }

    /// Opens a new viewer context for another trial and hands it this trial's parameters.
    ///
    /// `open` receives the new context's end of the channel and returns whatever the
    /// caller needs to keep it alive. A context that never reports ready is logged and
    /// otherwise ignored, since it stays usable for manual entry.
    pub fn open_new_trial_window<T, F>(&self, open: F) -> (T, Option<HandoffOutcome>)
    where
        F: FnOnce(TrialWindowEndpoint) -> T,
    {
        let (mut handle, endpoint) = trial_window_channel(&self.page);
        info!(page = %handle.page().as_str(), "opening new trial window");
        let window = open(endpoint);
        let policy = RetryPolicy {
            retries: self.config.handoff_retries,
            interval: self.config.handoff_interval(),
        };
        let parameters = self.result.as_ref().map(|result| &result.parameters);
        match push_trial_parameters(&mut handle, parameters, policy) {
            Ok(outcome) => (window, Some(outcome)),
            Err(err) => {
                info!(error = %err, "new trial window never became ready");
                (window, None)
            }
        }
    }

    pub fn summary(&self) -> Option<TrialSummary> {
        let result = self.result.as_ref()?;
        let render_scale = self.cell(Side::P).map_or(1.0, ImageCell::render_scale);
        Some(TrialSummary::build(result, render_scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{trial_json, trial_with_set_sizes};
    use crate::testing::{FakeImageSource, FakeService, ServiceCall};
    use image::Rgba;
    use serde_json::json;
    use std::time::Duration;

    const PAGE: &str = "http://host/render-ws/view/match-trial.html?matchTrialId=5c7e8c1ba7b11a0001ab6d2f";
    const TRIAL_ID: &str = "5c7e8c1ba7b11a0001ab6d2f";

    fn fast_config() -> ViewerConfig {
        ViewerConfig {
            view_scale: 0.5,
            draw_poll_millis: 10,
            draw_wait_polls: 300,
            handoff_interval_millis: 5,
            ..ViewerConfig::default()
        }
    }

    fn session_with(service: FakeService, images: FakeImageSource) -> TrialSession<FakeService> {
        TrialSession::new(
            service,
            Arc::new(images),
            fast_config(),
            PageLocation::parse(PAGE).unwrap(),
        )
    }

    fn example_trial() -> TrialResult {
        serde_json::from_value(trial_json(json!([
            {"p": [[10, 20], [5, 15]], "q": [[12, 22], [6, 16]], "w": [1, 1]}
        ])))
        .unwrap()
    }

    fn loaded_session(trial: TrialResult) -> TrialSession<FakeService> {
        let mut session = session_with(FakeService::serving(trial), FakeImageSource::with_size(60, 40));
        assert_eq!(session.load_trial(TRIAL_ID), SessionState::Loaded);
        session
    }

    #[test]
    fn load_counts_matches_across_sets() {
        let session = loaded_session(trial_with_set_sizes(&[3, 5]));
        assert_eq!(session.navigation().match_count, Some(8));
        assert_eq!(session.navigation().match_index, 0);
        assert_eq!(session.trial_label(), "1ab6d2f");
    }

    #[test]
    fn failed_load_leaves_session_without_result() {
        let mut session = session_with(FakeService::default(), FakeImageSource::with_size(10, 10));
        assert_eq!(session.load_trial("missing"), SessionState::Failed);
        assert!(session.result().is_none());
        assert_eq!(session.draw_all_matches(), DrawOutcome::NotLoaded);
    }

    #[test]
    fn stepping_from_no_selection_reports_first_match() {
        let mut session = loaded_session(example_trial());
        assert_eq!(session.navigation().match_count, Some(2));
        session.clear_selection();
        assert_eq!(session.draw_when_ready(DrawRequest::SelectedMatch(1)), DrawOutcome::Drawn);
        assert_eq!(session.navigation().match_index, 0);
        assert_eq!(session.match_info(), "match 1 of 2");
    }

    #[test]
    fn draw_is_deferred_until_both_cells_are_positioned() {
        let mut session = loaded_session(example_trial());
        // images load on worker threads; nothing has been pumped yet
        assert!(!session.cells_positioned());
        let outcome = session.draw_selected_matches(1);
        if outcome == DrawOutcome::Deferred {
            assert_eq!(session.navigation().match_index, 0);
            assert!(session.canvas().is_none());
        }
        assert_eq!(session.draw_when_ready(DrawRequest::AllMatches), DrawOutcome::Drawn);
        assert!(session.cells_positioned());
    }

    #[test]
    fn all_matches_draw_sizes_canvas_and_reports_total() {
        let mut session = loaded_session(trial_with_set_sizes(&[3, 5]));
        assert_eq!(session.draw_when_ready(DrawRequest::AllMatches), DrawOutcome::Drawn);
        let canvas = session.canvas().unwrap();
        // p at (4, 4), q at (68, 4)
        assert_eq!(canvas.dimensions(), (68 + 60 + 4, 44));
        assert_eq!(session.match_info(), "8 total matches");
        assert_eq!(session.navigation().match_index, 0);
    }

    #[test]
    fn stepping_wraps_both_directions() {
        let mut session = loaded_session(trial_with_set_sizes(&[3, 5]));
        assert_eq!(session.draw_when_ready(DrawRequest::AllMatches), DrawOutcome::Drawn);
        assert_eq!(session.draw_selected_matches(-1), DrawOutcome::Drawn);
        assert_eq!(session.match_info(), "match 8 of 8");
        assert_eq!(session.draw_selected_matches(5), DrawOutcome::Drawn);
        assert_eq!(session.match_info(), "match 5 of 8");
        assert_eq!(session.draw_selected_matches(-4), DrawOutcome::Drawn);
        assert_eq!(session.navigation().match_index, 0);
    }

    #[test]
    fn zero_matches_draw_only_images() {
        let mut session = loaded_session(trial_with_set_sizes(&[]));
        assert_eq!(session.draw_when_ready(DrawRequest::SelectedMatch(1)), DrawOutcome::Drawn);
        assert_eq!(session.match_info(), "");
        let canvas = session.canvas().unwrap();
        assert!(canvas.pixels().all(|px| *px != Rgba([0, 255, 0, 255])));
    }

    #[test]
    fn failed_image_stops_waiting() {
        let service = FakeService::serving(example_trial());
        let images = FakeImageSource::with_size(60, 40).failing_for("3718");
        let mut session = session_with(service, images);
        session.load_trial(TRIAL_ID);
        assert_eq!(session.draw_when_ready(DrawRequest::AllMatches), DrawOutcome::Deferred);
        assert_eq!(session.cell(Side::Q).unwrap().state(), CellState::Failed);
        assert!(session.canvas().is_none());
    }

    #[test]
    fn reload_drops_stale_image_events() {
        let service = FakeService::default();
        service.trials.borrow_mut().push_back(Ok(example_trial()));
        service.trials.borrow_mut().push_back(Ok(example_trial()));
        let mut session = session_with(service, FakeImageSource::with_size(60, 40));
        session.load_trial(TRIAL_ID);
        let first_generation = session.generation;
        // let the first generation's loads land in the channel before superseding it
        std::thread::sleep(Duration::from_millis(200));
        session.load_trial(TRIAL_ID);
        assert_ne!(session.generation, first_generation);
        assert_eq!(session.draw_when_ready(DrawRequest::AllMatches), DrawOutcome::Drawn);
        assert!(session.cells_positioned());
    }

    #[test]
    fn toggling_switches_marker_style_and_label() {
        let mut session = loaded_session(example_trial());
        assert_eq!(session.draw_when_ready(DrawRequest::AllMatches), DrawOutcome::Drawn);
        assert_eq!(session.toggle_lines_and_points(), ("Points", DrawOutcome::Drawn));
        assert!(session.navigation().draw_match_lines);
        assert_eq!(session.toggle_lines_and_points(), ("Lines", DrawOutcome::Drawn));
        assert!(!session.navigation().draw_match_lines);
    }

    #[test]
    fn toggle_right_after_load_waits_for_images() {
        let mut session = loaded_session(example_trial());
        assert_eq!(session.toggle_lines_and_points(), ("Points", DrawOutcome::Drawn));
        assert!(session.cells_positioned());
        assert!(session.canvas().is_some());
        assert_eq!(session.match_info(), "2 total matches");
    }

    #[test]
    fn jumps_count_from_either_end() {
        let mut session = loaded_session(trial_with_set_sizes(&[3, 5]));
        let request = session.jump_to(-1);
        assert_eq!(session.draw_when_ready(request), DrawOutcome::Drawn);
        assert_eq!(session.match_info(), "match 8 of 8");

        let request = session.jump_to(-3);
        assert_eq!(session.draw_when_ready(request), DrawOutcome::Drawn);
        assert_eq!(session.match_info(), "match 6 of 8");

        let request = session.jump_to(3);
        assert_eq!(session.draw_when_ready(request), DrawOutcome::Drawn);
        assert_eq!(session.match_info(), "match 3 of 8");

        let request = session.jump_to(1);
        assert_eq!(session.draw_when_ready(request), DrawOutcome::Drawn);
        assert_eq!(session.match_info(), "match 1 of 8");
    }

    #[test]
    fn delete_marks_label_and_keeps_result() {
        let mut session = loaded_session(example_trial());
        assert!(session.delete_trial());
        assert!(session.is_deleted());
        assert_eq!(session.trial_label(), "1ab6d2f DELETED");
        assert!(session.result().is_some());
        assert!(!session.delete_trial());
        let deletes = session
            .service
            .calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, ServiceCall::Delete(_)))
            .count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn failed_delete_is_only_logged() {
        let service = FakeService {
            fail_delete: true,
            ..FakeService::serving(example_trial())
        };
        let mut session = session_with(service, FakeImageSource::with_size(10, 10));
        session.load_trial(TRIAL_ID);
        assert!(!session.delete_trial());
        assert!(!session.is_deleted());
        assert!(session.can_delete());
    }

    #[test]
    fn run_trial_rejects_bad_urls_without_network() {
        let mut session = session_with(FakeService::default(), FakeImageSource::with_size(10, 10));
        let mut form = TrialForm::from_parameters(&example_trial().parameters);
        form.p_render_parameters_url = "http://host/render-ws/v1/owner/o/tile/1.2.0/jpeg-image".to_string();
        let err = session.run_trial(&form).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(session.service.call_count(), 0);
        assert!(session.run_trial_enabled());
    }

    #[test]
    fn run_trial_points_page_at_new_trial() {
        let mut session = session_with(FakeService::default(), FakeImageSource::with_size(10, 10));
        let form = TrialForm::from_parameters(&example_trial().parameters);
        assert_eq!(session.run_trial(&form).unwrap(), "new-trial-id");
        assert_eq!(session.page().trial_id().as_deref(), Some("new-trial-id"));
        assert!(!session.is_trial_running());
    }

    #[test]
    fn run_trial_surfaces_server_failure() {
        let service = FakeService::default();
        service
            .created
            .borrow_mut()
            .push_back(Err(TrialError::transport(Some(400), "Bad Request", "invalid fdSize")));
        let mut session = session_with(service, FakeImageSource::with_size(10, 10));
        let form = TrialForm::from_parameters(&example_trial().parameters);
        let err = session.run_trial(&form).unwrap_err();
        assert_eq!(err.to_string(), "Bad Request: invalid fdSize");
        assert!(session.run_trial_enabled());
        assert!(!session.is_trial_running());
    }

    #[test]
    fn save_refuses_locally() {
        let session = loaded_session(trial_with_set_sizes(&[3, 5]));
        assert!(session.save_trial_results_to_collection("flyTEM", "").unwrap_err().is_validation());
        assert!(session
            .save_trial_results_to_collection("flyTEM", "trial_saves")
            .unwrap_err()
            .is_validation());

        let mut bad_url = example_trial();
        bad_url.parameters.q_render_parameters_url = "http://host/render-ws/v1/somewhere/else".to_string();
        let session_bad_url = loaded_session(bad_url);
        assert!(session_bad_url
            .save_trial_results_to_collection("flyTEM", "trial_saves")
            .unwrap_err()
            .is_validation());

        let fetches_only = |s: &TrialSession<FakeService>| {
            s.service
                .calls
                .borrow()
                .iter()
                .all(|call| matches!(call, ServiceCall::Fetch(_)))
        };
        assert!(fetches_only(&session));
        assert!(fetches_only(&session_bad_url));
    }

    #[test]
    fn save_posts_single_pair_and_links_tile_pair_view() {
        let session = loaded_session(example_trial());
        let saved = session
            .save_trial_results_to_collection("flyTEM", "trial_saves")
            .unwrap();
        assert_eq!(saved.message, "saved match pair to trial_saves");
        assert!(saved.tile_pair_url.starts_with("http://tem:8080/render-ws/view/tile-pair.html?renderScale=0.1"));
        assert!(saved.tile_pair_url.contains("&pGroupId=3717.0&pId=151215054802105008.3717.0"));

        let calls = session.service.calls.borrow();
        let Some(ServiceCall::Save { owner, collection, pairs }) = calls.last() else {
            panic!("expected a save call, got {calls:?}");
        };
        assert_eq!(owner, "flyTEM");
        assert_eq!(collection, "trial_saves");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].q_group_id, "3718.0");
        assert_eq!(pairs[0].matches["w"], json!([1.0, 1.0]));
    }

    #[test]
    fn save_surfaces_server_failure() {
        let service = FakeService {
            fail_save: true,
            ..FakeService::serving(example_trial())
        };
        let mut session = session_with(service, FakeImageSource::with_size(10, 10));
        session.load_trial(TRIAL_ID);
        let err = session
            .save_trial_results_to_collection("flyTEM", "trial_saves")
            .unwrap_err();
        assert_eq!(err.to_string(), "Conflict: collection locked");
    }

    #[test]
    fn new_trial_window_receives_parameters() {
        let session = loaded_session(example_trial());
        let (endpoint, outcome) = session.open_new_trial_window(|endpoint| {
            endpoint.signal_ready();
            endpoint
        });
        assert_eq!(outcome, Some(HandoffOutcome::Delivered { checks: 1 }));
        assert!(endpoint.page().is_new_trial());
        let received = endpoint.receive(Duration::from_millis(100)).unwrap();
        assert_eq!(received.as_ref(), Some(&example_trial().parameters));
    }

    #[test]
    fn unready_new_window_is_abandoned_quietly() {
        let session = loaded_session(example_trial());
        let (_endpoint, outcome) = session.open_new_trial_window(|endpoint| endpoint);
        assert_eq!(outcome, None);
    }

    #[test]
    fn navigating_to_new_trial_page_clears_session() {
        let mut session = loaded_session(example_trial());
        let page = session.page().with_trial_id("TBD");
        assert_eq!(session.navigate(page), SessionState::Empty);
        assert!(session.result().is_none());
    }

    #[test]
    fn summary_uses_trial_render_scale() {
        let session = loaded_session(example_trial());
        let summary = session.summary().unwrap();
        assert!(summary.parameters.iter().any(|line| line == "Render Scale: 0.6"));
    }
}
