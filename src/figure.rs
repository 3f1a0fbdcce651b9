//! Pixel-free description of an attention diagram.
//!
//! A [`Figure`] holds everything needed to draw one diagram: a main grid with
//! one column per head (or layer) and one row per context token, an optional
//! averaged column, and the text around them. [`crate::render`] turns it into
//! an image.

use ndarray::{Array1, ArrayView2, Axis};

use crate::error::{AnalyserError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub column: usize,
    /// `0` is the first context token, drawn at the top.
    pub row: usize,
    /// Opacity in `[0, 1]`, taken from the attention magnitude.
    pub alpha: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub columns: usize,
    pub rows: usize,
    pub cells: Vec<Cell>,
    pub column_labels: Vec<String>,
}

impl Panel {
    fn from_columns(weights: ArrayView2<'_, f32>, column_labels: Vec<String>) -> Self {
        let (columns, rows) = weights.dim();
        let cells = weights
            .indexed_iter()
            .map(|((column, row), &w)| Cell {
                column,
                row,
                alpha: opacity(w),
            })
            .collect();
        Self {
            columns,
            rows,
            cells,
            column_labels,
        }
    }

    pub fn alpha_at(&self, column: usize, row: usize) -> Option<f64> {
        self.cells
            .iter()
            .find(|c| c.column == column && c.row == row)
            .map(|c| c.alpha)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    /// File stem used when the figure is saved.
    pub name: String,
    pub title: String,
    pub grid: Panel,
    pub average: Option<Panel>,
    /// Context token labels, top to bottom.
    pub row_labels: Vec<String>,
    /// Label of the generated token, printed right of the diagram.
    pub generated: String,
}

impl Figure {
    /// Lays out `weights` (`[column, key]`) against `labels`, whose last entry
    /// is the generated token and whose other entries label the key positions.
    pub fn grid(
        name: impl Into<String>,
        title: impl Into<String>,
        weights: ArrayView2<'_, f32>,
        labels: &[String],
        with_average: bool,
    ) -> Result<Self> {
        let Some((generated, context)) = labels.split_last() else {
            return Err(AnalyserError::SequenceTooShort);
        };
        if context.is_empty() {
            return Err(AnalyserError::SequenceTooShort);
        }
        if context.len() != weights.ncols() {
            return Err(AnalyserError::ContextMismatch {
                context: context.len(),
                keys: weights.ncols(),
            });
        }

        let column_labels = (0..weights.nrows()).map(|c| c.to_string()).collect();
        let grid = Panel::from_columns(weights, column_labels);
        let average = with_average.then(|| {
            let mean = column_mean(weights);
            Panel::from_columns(mean.view().insert_axis(Axis(0)), vec!["avg".to_string()])
        });

        Ok(Self {
            name: name.into(),
            title: title.into(),
            grid,
            average,
            row_labels: context.to_vec(),
            generated: generated.clone(),
        })
    }
}

/// Arithmetic mean over the columns of a `[column, key]` matrix.
pub fn column_mean(weights: ArrayView2<'_, f32>) -> Array1<f32> {
    weights.sum_axis(Axis(0)) / weights.nrows().max(1) as f32
}

fn opacity(weight: f32) -> f64 {
    let alpha = f64::from(weight.abs());
    if alpha.is_finite() { alpha.min(1.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn labels(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn grid_has_one_cell_per_column_and_token() {
        let weights = array![[0.1, 0.9], [0.5, 0.5], [1.0, 0.0]];
        let fig = Figure::grid(
            "single_attention_layer_0",
            "Heads in Layer 0",
            weights.view(),
            &labels(&["I", " like", " it"]),
            true,
        )
        .unwrap();

        assert_eq!(fig.grid.columns, 3);
        assert_eq!(fig.grid.rows, 2);
        assert_eq!(fig.grid.cells.len(), 6);
        assert_eq!(fig.grid.column_labels, labels(&["0", "1", "2"]));
        assert_eq!(fig.row_labels, labels(&["I", " like"]));
        assert_eq!(fig.generated, " it");
        assert!((fig.grid.alpha_at(0, 1).unwrap() - 0.9).abs() < 1e-6);

        let avg = fig.average.unwrap();
        assert_eq!(avg.columns, 1);
        assert_eq!(avg.column_labels, labels(&["avg"]));
        assert!((avg.alpha_at(0, 0).unwrap() - 1.6 / 3.0).abs() < 1e-6);
        assert!((avg.alpha_at(0, 1).unwrap() - 1.4 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn average_panel_is_optional() {
        let weights = array![[0.2, 0.8]];
        let fig = Figure::grid("f", "t", weights.view(), &labels(&["a", "b", "c"]), false).unwrap();
        assert!(fig.average.is_none());
    }

    #[test]
    fn opacity_uses_magnitude_and_clamps() {
        let weights = array![[-0.25, 3.0]];
        let fig = Figure::grid("f", "t", weights.view(), &labels(&["a", "b", "c"]), false).unwrap();
        assert_eq!(fig.grid.alpha_at(0, 0), Some(0.25));
        assert_eq!(fig.grid.alpha_at(0, 1), Some(1.0));
    }

    #[test]
    fn label_count_must_match_keys() {
        let weights = array![[0.2, 0.8]];
        let err = Figure::grid("f", "t", weights.view(), &labels(&["a", "b"]), true).unwrap_err();
        assert!(matches!(
            err,
            AnalyserError::ContextMismatch {
                context: 1,
                keys: 2
            }
        ));
        let err = Figure::grid("f", "t", weights.view(), &labels(&["a"]), true).unwrap_err();
        assert!(matches!(err, AnalyserError::SequenceTooShort));
    }
}
