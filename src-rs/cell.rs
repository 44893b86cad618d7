//! One side of a trial: a tile image placed in a fixed canvas cell.

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use image::RgbaImage;
use tracing::{debug, warn};
use url::Url;

use crate::client::ImageSource;
use crate::config::DEFAULT_VIEW_SCALE;
use crate::draw::blit;
use crate::error::{Result, TrialError};
use crate::urls::{image_url_for, render_scale_of};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    P,
    Q,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::P => f.write_str("p"),
            Side::Q => f.write_str("q"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Unloaded,
    Loading,
    LoadedUnpositioned,
    Positioned,
    /// Fetch or decode failed; the cell never becomes positioned.
    Failed,
}

/// Completion of one cell's image fetch, posted from its worker thread.
#[derive(Debug)]
pub struct CellEvent {
    pub generation: u64,
    pub side: Side,
    pub outcome: Result<RgbaImage>,
}

#[derive(Debug)]
pub struct ImageCell {
    side: Side,
    row: u32,
    column: u32,
    view_scale: f64,
    render_scale: f64,
    cell_margin: u32,
    image_url: Url,
    state: CellState,
    image: Option<RgbaImage>,
    x: u32,
    y: u32,
}

impl ImageCell {
    pub fn new(
        side: Side,
        render_parameters_url: &str,
        row: u32,
        column: u32,
        view_scale: f64,
        cell_margin: u32,
    ) -> Result<Self> {
        let view_scale = if view_scale.is_finite() {
            view_scale
        } else {
            DEFAULT_VIEW_SCALE
        };
        Ok(Self {
            side,
            row,
            column,
            view_scale,
            render_scale: render_scale_of(render_parameters_url),
            cell_margin,
            image_url: image_url_for(render_parameters_url, view_scale)?,
            state: CellState::Unloaded,
            image: None,
            x: 0,
            y: 0,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn image_url(&self) -> &str {
        self.image_url.as_str()
    }

    pub fn view_scale(&self) -> f64 {
        self.view_scale
    }

    /// Scale of the trial's own render parameters, for display.
    pub fn render_scale(&self) -> f64 {
        self.render_scale
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn is_positioned(&self) -> bool {
        self.state == CellState::Positioned
    }

    pub fn origin(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn natural_width(&self) -> u32 {
        self.image.as_ref().map_or(0, RgbaImage::width)
    }

    pub fn natural_height(&self) -> u32 {
        self.image.as_ref().map_or(0, RgbaImage::height)
    }

    /// Starts the fetch on a worker thread. Only the first call on a cell does anything.
    pub fn load_image(
        &mut self,
        source: Arc<dyn ImageSource>,
        events: Sender<CellEvent>,
        generation: u64,
    ) {
        if self.state != CellState::Unloaded {
            return;
        }
        self.state = CellState::Loading;
        let side = self.side;
        let url = self.image_url.to_string();
        debug!(%side, %url, generation, "loading cell image");
        thread::spawn(move || {
            let outcome = source.fetch_image(&url).and_then(|bytes| decode_image(&bytes));
            // the session may already be gone; nothing to report to
            let _ = events.send(CellEvent {
                generation,
                side,
                outcome,
            });
        });
    }

    /// Applies a completed fetch. Failures leave the cell permanently unpositioned.
    pub fn complete_load(&mut self, outcome: Result<RgbaImage>) {
        match outcome {
            Ok(image) => {
                self.image = Some(image);
                self.state = CellState::LoadedUnpositioned;
                self.position_image();
            }
            Err(err) => {
                warn!(side = %self.side, url = %self.image_url, error = %err, "cell image failed to load");
                self.state = CellState::Failed;
            }
        }
    }

    fn position_image(&mut self) {
        let (width, height) = (self.natural_width(), self.natural_height());
        self.x = self.column * (width + self.cell_margin) + self.cell_margin;
        self.y = self.row * (height + self.cell_margin) + self.cell_margin;
        self.state = CellState::Positioned;
    }

    /// Paints the image at its origin; the server already rendered it at view scale.
    pub fn draw_loaded_image(&self, canvas: &mut RgbaImage) {
        if let Some(image) = &self.image {
            blit(canvas, image, self.x, self.y);
        }
    }

    /// Full scale tile coordinates to canvas coordinates.
    pub fn to_screen(&self, point: (f64, f64)) -> (f64, f64) {
        (
            point.0 * self.view_scale + f64::from(self.x),
            point.1 * self.view_scale + f64::from(self.y),
        )
    }

    pub fn from_screen(&self, point: (f64, f64)) -> (f64, f64) {
        (
            (point.0 - f64::from(self.x)) / self.view_scale,
            (point.1 - f64::from(self.y)) / self.view_scale,
        )
    }
}

fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|err| TrialError::Decode {
            what: "tile image".to_string(),
            message: err.to_string(),
        })
}
