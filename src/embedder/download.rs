/// Model file auto-download from the Hugging Face hub.
///
/// Downloads the ONNX export and tokenizer files for the configured model
/// identifier if they don't already exist locally.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

const HF_BASE: &str = "https://huggingface.co";

/// Files required for the embedder, with their paths inside the model repo.
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
    ("special_tokens_map.json", "special_tokens_map.json"),
    ("tokenizer_config.json", "tokenizer_config.json"),
];

/// Return the default local directory for a model identifier.
///
/// `sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2` maps to
/// `models/paraphrase-multilingual-MiniLM-L12-v2`.
#[must_use]
pub fn default_model_dir(model_id: &str) -> PathBuf {
    let name = model_id.rsplit('/').next().unwrap_or(model_id);
    PathBuf::from("models").join(name)
}

/// Check whether all required model files exist in `model_dir`.
#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

/// Download model files if any are missing.
///
/// Creates the model directory if it doesn't exist.
/// Skips individual files that are already present.
pub fn download_model_files(model_id: &str, model_dir: &Path) -> Result<()> {
    info!("Checking model files in {}", model_dir.display());

    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create models directory: {}", model_dir.display()))?;

    if all_files_present(model_dir) {
        info!("All model files found, skipping download");
        return Ok(());
    }

    info!("Downloading {model_id} from the Hugging Face hub (one-time)");

    for &(filename, url_path) in MODEL_FILES {
        let dest = model_dir.join(filename);

        if dest.exists() {
            info!("File already exists: {filename}");
            continue;
        }

        let url = file_url(model_id, url_path);
        info!("Downloading {filename}...");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
    }

    info!("Model download complete");
    Ok(())
}

fn file_url(model_id: &str, path: &str) -> String {
    format!("{HF_BASE}/{model_id}/resolve/main/{path}")
}

/// Download a single file with a progress bar.
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;

    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let total = resp.content_length().unwrap_or(0);

    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")
            .context("invalid progress template")?
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    } else {
        ProgressBar::new_spinner()
    };

    let bytes = resp.bytes().context("failed to read response body")?;

    // Write to a temporary name first so an interrupted download is retried
    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial)
        .with_context(|| format!("failed to create file: {}", partial.display()))?;
    file.write_all(&bytes).context("failed to write file")?;
    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move download into {}", dest.display()))?;

    pb.set_position(bytes.len() as u64);
    pb.finish_and_clear();

    Ok(())
}
