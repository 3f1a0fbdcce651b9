use std::path::PathBuf;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1, s};
use tracing::{debug, info, warn};

use crate::config::{AnalyserConfig, ConfigUpdate};
use crate::decode::{TokenDecoder, label_tokens};
use crate::error::{AnalyserError, Result};
use crate::figure::Figure;
use crate::render;
use crate::tensor::AttentionStack;

/// Everything recorded for one generated word, one entry per generation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordRecord {
    pub attn: Vec<AttentionStack>,
    /// `[layer, key]` head averages of `attn`.
    pub layer_avg: Vec<Array2<f32>>,
    /// Labels of the full sequence, generated word last.
    pub input: Vec<Vec<String>>,
}

impl WordRecord {
    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}

/// Generated words in the order they were first seen.
#[derive(Debug, Clone, Default)]
pub struct GeneratedMap {
    records: IndexMap<String, WordRecord>,
}

impl GeneratedMap {
    pub fn get(&self, word: &str) -> Option<&WordRecord> {
        self.records.get(word)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.records.contains_key(word)
    }

    pub fn first(&self) -> Option<&str> {
        self.records.get_index(0).map(|(word, _)| word.as_str())
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn entry(&mut self, word: &str) -> &mut WordRecord {
        self.records.entry(word.to_string()).or_default()
    }
}

/// Draws attention diagrams for generated tokens and collects statistics per
/// generated word.
#[derive(Default)]
pub struct AttentionAnalyser {
    config: AnalyserConfig,
    decoder: Option<Box<dyn TokenDecoder>>,
    generated: GeneratedMap,
}

impl AttentionAnalyser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decoder(decoder: Box<dyn TokenDecoder>) -> Self {
        Self {
            decoder: Some(decoder),
            ..Self::default()
        }
    }

    pub fn set_decoder(&mut self, decoder: Option<Box<dyn TokenDecoder>>) {
        self.decoder = decoder;
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn generated(&self) -> &GeneratedMap {
        &self.generated
    }

    pub fn update(&mut self, update: &ConfigUpdate) {
        self.config.apply(update);
    }

    /// Restores the default configuration and forgets every recorded word.
    /// The installed decoder is kept.
    pub fn reset(&mut self) {
        self.config = AnalyserConfig::default();
        self.generated = GeneratedMap::default();
    }

    /// Draws the heads of the configured layer for the generated (last) token
    /// and, if enabled, the head-averaged view of every layer.
    pub fn plot_single_attention_diagrams(
        &mut self,
        attention: &AttentionStack,
        generated: &[u32],
        update: &ConfigUpdate,
    ) -> Result<Vec<Figure>> {
        self.update(update);
        let labels = self.labels(generated)?;
        let mut figures = Vec::new();

        match self.config.layer.and_then(|l| attention.head_rows(l).map(|rows| (l, rows))) {
            Some((layer, heads)) => {
                let figure = Figure::grid(
                    format!("single_attention_layer_{layer}"),
                    format!("Heads in Layer {layer}"),
                    heads.view(),
                    &labels,
                    self.config.show_avgplot,
                )?;
                figures.push(self.show(figure)?);
            }
            None => debug!(
                layer = ?self.config.layer,
                layers = attention.layers(),
                "selected layer not present, skipping per-head diagram"
            ),
        }

        if self.config.show_layeravg {
            let figure = Figure::grid(
                "single_attention_layer_avg",
                "Layer Avg",
                attention.layer_average().view(),
                &labels,
                self.config.show_avgplot,
            )?;
            figures.push(self.show(figure)?);
        }
        Ok(figures)
    }

    /// Records one generation step under its generated (last) token.
    pub fn add_attention(
        &mut self,
        attention: AttentionStack,
        generated: &[u32],
        update: &ConfigUpdate,
    ) -> Result<()> {
        self.update(update);
        let labels = self.labels(generated)?;
        let Some((word, context)) = labels.split_last() else {
            return Err(AnalyserError::SequenceTooShort);
        };
        if context.is_empty() {
            return Err(AnalyserError::SequenceTooShort);
        }
        if context.len() != attention.key_positions() {
            return Err(AnalyserError::ContextMismatch {
                context: context.len(),
                keys: attention.key_positions(),
            });
        }

        let layer_avg = attention.layer_average();
        let record = self.generated.entry(word);
        if let Some(first) = record.layer_avg.first()
            && first.nrows() != layer_avg.nrows()
        {
            return Err(AnalyserError::LayerMismatch {
                expected: first.nrows(),
                found: layer_avg.nrows(),
            });
        }
        debug!(word = %word, count = record.len() + 1, "recorded attention");
        record.attn.push(attention);
        record.layer_avg.push(layer_avg);
        record.input.push(labels.clone());
        Ok(())
    }

    /// Draws how `search` (or the first recorded word) attends to the positions
    /// before it, averaged over every recorded generation of that word.
    ///
    /// Returns `Ok(None)` without drawing anything when the word was never
    /// generated.
    pub fn plot_by_word_statistics(
        &mut self,
        search: Option<&str>,
        update: &ConfigUpdate,
    ) -> Result<Option<Vec<Figure>>> {
        self.update(update);
        let word = match search {
            Some(word) if self.generated.contains(word) => word.to_string(),
            Some(word) => {
                warn!(word = %word, "generated word not found");
                if self.generated.contains(&format!(" {word}")) {
                    warn!("try to add a space (' ') in front of the word");
                }
                return Ok(None);
            }
            None => match self.generated.first() {
                Some(word) => word.to_string(),
                None => {
                    warn!("no generated words recorded");
                    return Ok(None);
                }
            },
        };
        let Some(record) = self.generated.get(&word) else {
            return Ok(None);
        };

        let stem = file_stem(&word);
        let mut figures = Vec::new();
        if self.config.show_generation {
            for (i, (layer_avg, input)) in record.layer_avg.iter().zip(&record.input).enumerate() {
                let figure = Figure::grid(
                    format!("word_statistics_word_{stem}_generation_{i}"),
                    "Layer Avg",
                    layer_avg.view(),
                    input,
                    self.config.show_avgplot,
                )?;
                figures.push(self.show(figure)?);
            }
        }

        let (positions, avg_attn) = position_average(record)?;
        let mut labels: Vec<String> = positions.iter().map(i64::to_string).collect();
        labels.push(word.clone());
        let figure = Figure::grid(
            format!("word_statistics_word_{stem}"),
            format!("Avg Attention of '{word}' in each Layer to different Position"),
            avg_attn.view(),
            &labels,
            self.config.show_avgplot,
        )?;
        figures.push(self.show(figure)?);
        Ok(Some(figures))
    }

    fn labels(&self, ids: &[u32]) -> Result<Vec<String>> {
        if !self.config.decode {
            return label_tokens(ids, None);
        }
        let decoder = self.decoder.as_deref().ok_or(AnalyserError::MissingDecoder)?;
        label_tokens(ids, Some(decoder))
    }

    fn show(&self, figure: Figure) -> Result<Figure> {
        info!(figure = %figure.name, title = %figure.title, "attention diagram ready");
        if let Some(dir) = &self.config.save_plot {
            std::fs::create_dir_all(dir)?;
            let path: PathBuf =
                dir.join(format!("{}.{}", figure.name, self.config.format.extension()));
            render::save(&figure, &path)?;
            info!(path = %path.display(), "saved attention diagram");
        }
        Ok(figure)
    }
}

/// Ratio-to-sum normalization.
pub fn norm(values: ArrayView1<'_, f32>) -> Result<Array1<f32>> {
    let sum = values.sum();
    if sum == 0.0 || !sum.is_finite() {
        return Err(AnalyserError::ZeroSum(sum));
    }
    Ok(values.mapv(|v| v / sum))
}

/// Averages the normalized trailing window of every generation of a word.
///
/// The window is as long as the shortest recorded context, so position `-1`
/// is always the token right before the generated one. Returns the relative
/// positions and the `[layer, position]` averages.
pub fn position_average(record: &WordRecord) -> Result<(Vec<i64>, Array2<f32>)> {
    let min_len = record
        .input
        .iter()
        .map(Vec::len)
        .min()
        .ok_or(AnalyserError::SequenceTooShort)?;
    let window = min_len.saturating_sub(1);
    if window == 0 {
        return Err(AnalyserError::SequenceTooShort);
    }
    let layers = record.layer_avg.first().map_or(0, Array2::nrows);
    let count = record.layer_avg.len() as f32;

    let mut avg = Array2::<f32>::zeros((layers, window));
    for layer_avg in &record.layer_avg {
        let keys = layer_avg.ncols();
        for (layer, row) in layer_avg.rows().into_iter().enumerate() {
            let normed = norm(row.slice(s![keys - window..]))?;
            let mut target = avg.row_mut(layer);
            target.scaled_add(1.0 / count, &normed);
        }
    }
    let positions = (1..=window as i64).rev().map(|p| -p).collect();
    Ok((positions, avg))
}

fn file_stem(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
