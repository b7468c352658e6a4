use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use keyword_image_search::{
    batch::{DEFAULT_MAX_KEYWORDS, DEFAULT_MAX_RESULTS},
    init_tracing, BatchOrchestrator, BatchResult, Config, ImageSearchClient,
};

const DISCLAIMER: &str = "\
NOTICE: image URLs are collected from a third-party search provider.
Images remain the property of their owners and may be subject to copyright
or license terms. Check each image's license before reuse, and download and
host images yourself rather than hotlinking them from the source site.";

/// Search images for every keyword in a newline-delimited file.
#[derive(Debug, Parser)]
#[command(name = "image-batch", version)]
struct Args {
    /// Keyword file, one keyword per line (`#` starts a comment).
    #[arg(short, long, default_value = "keywords.txt")]
    file: PathBuf,

    /// Only the first N keywords are searched.
    #[arg(long, default_value_t = DEFAULT_MAX_KEYWORDS)]
    max_keywords: usize,

    /// Images requested per keyword.
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: usize,

    /// Also print the full batch result as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let keywords = read_keywords(&args.file)?;
    let config = Config::from_env().context("invalid configuration")?;

    println!("{DISCLAIMER}\n");
    if keywords.len() > args.max_keywords {
        println!(
            "{} keywords found, only the first {} will be searched.\n",
            keywords.len(),
            args.max_keywords
        );
    }

    let orchestrator = BatchOrchestrator::new(ImageSearchClient::from_config(&config));
    let batch = orchestrator
        .run(&keywords[..], args.max_keywords, args.max_results)
        .await;

    print!("{}", render_summary(&batch));
    if args.json {
        println!("{}", serde_json::to_string_pretty(&batch)?);
    }
    Ok(())
}

fn read_keywords(path: &Path) -> anyhow::Result<Vec<String>> {
    if !path.exists() {
        bail!("keyword file {} not found", path.display());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let keywords = parse_keywords(&text);
    if keywords.is_empty() {
        bail!("keyword file {} contains no keywords", path.display());
    }
    Ok(keywords)
}

fn parse_keywords(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn render_summary(batch: &BatchResult) -> String {
    let mut out = String::from("--- Results ---\n");
    for (keyword, result) in batch.results.iter() {
        if result.success {
            out.push_str(&format!("[ok] {}: {} image(s)\n", keyword, result.count));
            for (i, image) in result.images.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", i + 1, image.url));
            }
        } else {
            out.push_str(&format!(
                "[failed] {}: {}\n",
                keyword,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    out.push_str(&format!(
        "\nTotal: {} image(s) across {} keyword(s)\n",
        batch.total_images(),
        batch.total_keywords
    ));
    out
}
