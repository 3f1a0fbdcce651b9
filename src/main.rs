use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use attention_analyser::{
    AttentionAnalyser, Capture, ConfigUpdate, FigureFormat, Gpt2Vocab, TokenDecoder,
};

#[derive(Parser)]
#[command(name = "attention-analyser")]
#[command(about = "Draw attention diagrams from captured generation steps")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    display: DisplayArgs,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Heads of one layer (and optionally every layer averaged) for one step
    Single {
        #[arg(long)]
        capture: PathBuf,
        /// Step of the capture to draw
        #[arg(long, default_value_t = 0)]
        step: usize,
    },
    /// Attention of one generated word averaged over every step that produced it
    WordStats {
        #[arg(long)]
        capture: PathBuf,
        /// Generated word to aggregate; defaults to the first one recorded
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Args)]
struct DisplayArgs {
    /// JSON file with analyser settings, applied before the flags below
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// GPT-2 vocab.json used to decode token ids
    #[arg(long, global = true)]
    vocab: Option<PathBuf>,
    /// Hugging Face tokenizer.json used to decode token ids
    #[arg(long, global = true)]
    tokenizer: Option<PathBuf>,
    /// Label tokens with text instead of ids
    #[arg(long, global = true)]
    decode: bool,
    /// Draw the averaged column (`--avg false` hides it)
    #[arg(long, global = true)]
    avg: Option<bool>,
    /// Layer whose heads are drawn
    #[arg(long, global = true)]
    layer: Option<usize>,
    /// Also draw every layer averaged over its heads
    #[arg(long, global = true)]
    layer_avg: bool,
    /// Directory to write figures to
    #[arg(long, global = true)]
    save: Option<PathBuf>,
    /// Image format of saved figures
    #[arg(long, global = true, value_enum)]
    format: Option<FigureFormat>,
    /// Draw every generation of the word before the aggregate
    #[arg(long, global = true)]
    show_generation: bool,
}

impl DisplayArgs {
    fn update(&self) -> Result<ConfigUpdate> {
        let base = match &self.config {
            Some(path) => ConfigUpdate::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ConfigUpdate::default(),
        };
        let mut flags = ConfigUpdate::default();
        if self.decode {
            flags = flags.decode(true);
        }
        if let Some(avg) = self.avg {
            flags = flags.show_avgplot(avg);
        }
        if let Some(layer) = self.layer {
            flags = flags.layer(Some(layer));
        }
        if self.layer_avg {
            flags = flags.show_layeravg(true);
        }
        if let Some(dir) = &self.save {
            flags = flags.save_plot(Some(dir.clone()));
        }
        if let Some(format) = self.format {
            flags = flags.format(format);
        }
        if self.show_generation {
            flags = flags.show_generation(true);
        }
        Ok(base.merge(flags))
    }

    fn decoder(&self) -> Result<Option<Box<dyn TokenDecoder>>> {
        if let Some(path) = &self.tokenizer {
            return hf_decoder(path);
        }
        match &self.vocab {
            Some(path) => {
                let vocab = Gpt2Vocab::from_file(path)
                    .with_context(|| format!("failed to load vocab {}", path.display()))?;
                info!(tokens = vocab.len(), "loaded vocab");
                Ok(Some(Box::new(vocab)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(feature = "hf-tokenizer")]
fn hf_decoder(path: &Path) -> Result<Option<Box<dyn TokenDecoder>>> {
    let decoder = attention_analyser::HfDecoder::from_file(path)
        .with_context(|| format!("failed to load tokenizer {}", path.display()))?;
    Ok(Some(Box::new(decoder)))
}

#[cfg(not(feature = "hf-tokenizer"))]
fn hf_decoder(_path: &Path) -> Result<Option<Box<dyn TokenDecoder>>> {
    Err(anyhow!(
        "--tokenizer requires the `hf-tokenizer` feature; rebuild with `--features hf-tokenizer`"
    ))
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let update = cli.display.update()?;
    let mut analyser = AttentionAnalyser::new();
    analyser.set_decoder(cli.display.decoder()?);

    match &cli.command {
        Command::Single { capture, step } => {
            let capture = load_capture(capture)?;
            let entry = capture
                .steps
                .get(*step)
                .ok_or_else(|| anyhow!("capture has {} steps, no step {step}", capture.steps.len()))?;
            let figures = analyser
                .plot_single_attention_diagrams(&entry.attention, &entry.tokens, &update)
                .context("failed to draw attention diagrams")?;
            info!(figures = figures.len(), "done");
        }
        Command::WordStats { capture, search } => {
            let capture = load_capture(capture)?;
            let steps = capture.steps.len();
            for (i, entry) in capture.steps.into_iter().enumerate() {
                analyser
                    .add_attention(entry.attention, &entry.tokens, &update)
                    .with_context(|| format!("failed to record step {i}"))?;
            }
            info!(steps, words = analyser.generated().len(), "recorded generation steps");
            match analyser
                .plot_by_word_statistics(search.as_deref(), &update)
                .context("failed to draw word statistics")?
            {
                Some(figures) => info!(figures = figures.len(), "done"),
                None => info!("nothing drawn"),
            }
        }
    }
    Ok(())
}

fn load_capture(path: &Path) -> Result<Capture> {
    Capture::from_json_file(path).with_context(|| format!("failed to load capture {}", path.display()))
}

fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("config.json");
        std::fs::write(&config, r#"{"show_avgplot": false, "layer": 2}"#).expect("write config");

        let cli = Cli::try_parse_from([
            "attention-analyser",
            "single",
            "--capture",
            "capture.json",
            "--config",
            config.to_str().expect("utf-8 path"),
            "--avg",
            "true",
        ])
        .expect("parse");
        let update = cli.display.update().expect("update");
        assert_eq!(update.show_avgplot, Some(true));
        assert_eq!(update.layer, Some(Some(2)));
    }

    #[test]
    fn avg_flag_can_hide_column() {
        let cli = Cli::try_parse_from([
            "attention-analyser",
            "word-stats",
            "--capture",
            "capture.json",
            "--avg",
            "false",
        ])
        .expect("parse");
        let update = cli.display.update().expect("update");
        assert_eq!(update.show_avgplot, Some(false));
    }
}
