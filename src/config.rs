use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// Image format figures are saved in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FigureFormat {
    #[default]
    Png,
    Svg,
}

impl FigureFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FigureFormat::Png => "png",
            FigureFormat::Svg => "svg",
        }
    }
}

/// Display settings of an [`AttentionAnalyser`](crate::AttentionAnalyser).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// Label tokens with decoded text instead of their ids.
    pub decode: bool,
    /// Draw the averaged column to the right of the grid.
    pub show_avgplot: bool,
    /// Layer whose heads are drawn. Out of range means no per-layer figure.
    pub layer: Option<usize>,
    /// Also draw one column per layer, each averaged over its heads.
    pub show_layeravg: bool,
    /// Directory figures are written to.
    pub save_plot: Option<PathBuf>,
    pub format: FigureFormat,
    /// Draw every stored generation before the word aggregate.
    pub show_generation: bool,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            decode: false,
            show_avgplot: true,
            layer: Some(11),
            show_layeravg: false,
            save_plot: None,
            format: FigureFormat::Png,
            show_generation: false,
        }
    }
}

impl AnalyserConfig {
    /// Overwrites the fields present in `update` and keeps the rest.
    pub fn apply(&mut self, update: &ConfigUpdate) {
        if let Some(decode) = update.decode {
            self.decode = decode;
        }
        if let Some(show_avgplot) = update.show_avgplot {
            self.show_avgplot = show_avgplot;
        }
        if let Some(layer) = update.layer {
            self.layer = layer;
        }
        if let Some(show_layeravg) = update.show_layeravg {
            self.show_layeravg = show_layeravg;
        }
        if let Some(save_plot) = &update.save_plot {
            self.save_plot = save_plot.clone();
        }
        if let Some(format) = update.format {
            self.format = format;
        }
        if let Some(show_generation) = update.show_generation {
            self.show_generation = show_generation;
        }
    }
}

/// A partial [`AnalyserConfig`]; `None` leaves the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    pub decode: Option<bool>,
    pub show_avgplot: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub layer: Option<Option<usize>>,
    pub show_layeravg: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub save_plot: Option<Option<PathBuf>>,
    pub format: Option<FigureFormat>,
    pub show_generation: Option<bool>,
}

impl ConfigUpdate {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn decode(mut self, decode: bool) -> Self {
        self.decode = Some(decode);
        self
    }

    pub fn show_avgplot(mut self, show: bool) -> Self {
        self.show_avgplot = Some(show);
        self
    }

    pub fn layer(mut self, layer: Option<usize>) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn show_layeravg(mut self, show: bool) -> Self {
        self.show_layeravg = Some(show);
        self
    }

    pub fn save_plot(mut self, dir: Option<PathBuf>) -> Self {
        self.save_plot = Some(dir);
        self
    }

    pub fn format(mut self, format: FigureFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn show_generation(mut self, show: bool) -> Self {
        self.show_generation = Some(show);
        self
    }

    /// Layers `other` on top of `self`: fields set in `other` win.
    pub fn merge(mut self, other: ConfigUpdate) -> Self {
        self.decode = other.decode.or(self.decode);
        self.show_avgplot = other.show_avgplot.or(self.show_avgplot);
        self.layer = other.layer.or(self.layer);
        self.show_layeravg = other.show_layeravg.or(self.show_layeravg);
        self.save_plot = other.save_plot.or(self.save_plot);
        self.format = other.format.or(self.format);
        self.show_generation = other.show_generation.or(self.show_generation);
        self
    }
}

// Distinguishes a missing key (leave alone) from an explicit `null` (clear).
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_only_touches_present_fields() {
        let mut config = AnalyserConfig::default();
        config.apply(&ConfigUpdate::default().decode(true).layer(Some(3)));
        assert!(config.decode);
        assert_eq!(config.layer, Some(3));
        assert!(config.show_avgplot);
        assert!(!config.show_layeravg);
        assert_eq!(config.save_plot, None);

        config.apply(&ConfigUpdate::default().show_avgplot(false));
        assert!(config.decode);
        assert_eq!(config.layer, Some(3));
        assert!(!config.show_avgplot);
    }

    #[test]
    fn save_plot_can_be_cleared() {
        let mut config = AnalyserConfig::default();
        config.apply(&ConfigUpdate::default().save_plot(Some("fig".into())));
        assert_eq!(config.save_plot, Some(PathBuf::from("fig")));
        config.apply(&ConfigUpdate::default());
        assert_eq!(config.save_plot, Some(PathBuf::from("fig")));
        config.apply(&ConfigUpdate::default().save_plot(None));
        assert_eq!(config.save_plot, None);
    }

    #[test]
    fn json_null_differs_from_missing() {
        let update: ConfigUpdate = serde_json::from_str(r#"{"save_plot": null}"#).unwrap();
        assert_eq!(update.save_plot, Some(None));
        assert_eq!(update.layer, None);

        let update: ConfigUpdate =
            serde_json::from_str(r#"{"layer": 4, "decode": true, "format": "svg"}"#).unwrap();
        assert_eq!(update.layer, Some(Some(4)));
        assert_eq!(update.decode, Some(true));
        assert_eq!(update.format, Some(FigureFormat::Svg));
    }

    #[test]
    fn merge_prefers_later_values() {
        let file = ConfigUpdate::default().decode(true).layer(Some(2));
        let flags = ConfigUpdate::default().layer(Some(5));
        let merged = file.merge(flags);
        assert_eq!(merged.decode, Some(true));
        assert_eq!(merged.layer, Some(Some(5)));
    }
}
