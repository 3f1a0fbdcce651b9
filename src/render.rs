use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::error::{AnalyserError, Result};
use crate::figure::{Figure, Panel};

/// Dark orange, blended towards white by each cell's opacity.
pub const CELL_COLOR: RGBColor = RGBColor(255, 140, 0);

const CELL: i32 = 36;
const GAP: i32 = 18;
const LABEL_WIDTH: i32 = 180;
const TITLE_HEIGHT: i32 = 56;
const FOOTER_HEIGHT: i32 = 36;
const FONT: (&str, u32) = ("sans-serif", 16);

/// Writes `figure` to `path`; the extension picks the backend (`png` or `svg`).
pub fn save(figure: &Figure, path: &Path) -> Result<()> {
    let size = canvas_size(figure);
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("png") => draw(figure, BitMapBackend::new(path, size).into_drawing_area()),
        Some("svg") => draw(figure, SVGBackend::new(path, size).into_drawing_area()),
        _ => Err(AnalyserError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Pixel size of the image `figure` is drawn on.
pub fn canvas_size(figure: &Figure) -> (u32, u32) {
    let width = LABEL_WIDTH + grid_width(figure) + LABEL_WIDTH;
    let height = TITLE_HEIGHT + figure.grid.rows as i32 * CELL + FOOTER_HEIGHT;
    (width as u32, height as u32)
}

fn grid_width(figure: &Figure) -> i32 {
    let main = figure.grid.columns as i32 * CELL;
    match &figure.average {
        Some(avg) => main + GAP + avg.columns as i32 * CELL,
        None => main,
    }
}

fn draw<DB: DrawingBackend>(figure: &Figure, root: DrawingArea<DB, Shift>) -> Result<()> {
    root.fill(&WHITE).map_err(draw_error)?;

    let (width, _) = canvas_size(figure);
    let title = FONT
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    root.draw(&Text::new(
        figure.title.clone(),
        (width as i32 / 2, TITLE_HEIGHT / 2),
        title,
    ))
    .map_err(draw_error)?;

    let row_label = FONT
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Right, VPos::Center));
    for (row, label) in figure.row_labels.iter().enumerate() {
        let y = TITLE_HEIGHT + row as i32 * CELL + CELL / 2;
        root.draw(&Text::new(
            printable(label),
            (LABEL_WIDTH - 8, y),
            row_label.clone(),
        ))
        .map_err(draw_error)?;
    }

    let mut x = LABEL_WIDTH;
    draw_panel(&root, &figure.grid, x)?;
    x += figure.grid.columns as i32 * CELL;
    if let Some(avg) = &figure.average {
        x += GAP;
        draw_panel(&root, avg, x)?;
        x += avg.columns as i32 * CELL;
    }

    let generated = FONT
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    let middle = TITLE_HEIGHT + figure.grid.rows as i32 * CELL / 2;
    root.draw(&Text::new(
        printable(&figure.generated),
        (x + 8, middle),
        generated,
    ))
    .map_err(draw_error)?;

    root.present().map_err(draw_error)
}

fn draw_panel<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    panel: &Panel,
    left: i32,
) -> Result<()> {
    for cell in &panel.cells {
        let x0 = left + cell.column as i32 * CELL;
        let y0 = TITLE_HEIGHT + cell.row as i32 * CELL;
        root.draw(&Rectangle::new(
            [(x0, y0), (x0 + CELL, y0 + CELL)],
            CELL_COLOR.mix(cell.alpha).filled(),
        ))
        .map_err(draw_error)?;
    }

    let label = FONT
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    let y = TITLE_HEIGHT + panel.rows as i32 * CELL + FOOTER_HEIGHT / 2;
    for (column, text) in panel.column_labels.iter().enumerate() {
        let x = left + column as i32 * CELL + CELL / 2;
        root.draw(&Text::new(text.clone(), (x, y), label.clone()))
            .map_err(draw_error)?;
    }
    Ok(())
}

fn printable(label: &str) -> String {
    label.replace('\n', "\\n").replace('\t', "\\t")
}

fn draw_error<E: std::error::Error + Send + Sync>(err: DrawingAreaErrorKind<E>) -> AnalyserError {
    AnalyserError::Draw(err.to_string())
}
