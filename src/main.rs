use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use site2pdf::{ChromiumRenderer, Crawler, PdfAssembler};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "site2pdf")]
#[command(about = "Crawl a website and bind every page into one PDF with a clickable table of contents")]
#[command(version = "0.1.0")]
struct Args {
    /// Root URL of the website to start crawling from
    root_url: String,

    /// Max depth of the crawl (0 = root page only)
    #[arg(short = 'L', long = "level", default_value = "0")]
    level: usize,

    /// Link texts to exclude from crawling
    #[arg(short = 'e', long = "exclude", num_args = 1..)]
    exclude: Vec<String>,

    /// Per-page render timeout in seconds
    #[arg(short = 't', long = "timeout", default_value = "30.0", value_parser = parse_timeout)]
    timeout: f64,

    /// Output directory used to save per-page PDFs
    #[arg(short = 'o', long = "outDir", default_value = "website_pdfs")]
    out_dir: String,

    /// Path of the final combined PDF
    #[arg(long = "output", default_value = "final_combined_output.pdf")]
    output: String,
}

fn parse_timeout(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if value < 0.0 {
        return Err("Must be zero or positive number.".to_string());
    }
    Ok(value)
}

async fn run(args: Args) -> Result<()> {
    let root = Url::parse(&args.root_url)
        .with_context(|| format!("Invalid root URL '{}'", args.root_url))?;

    info!("Visiting \"{}\"", root.to_string().green());

    let renderer = ChromiumRenderer::launch(Duration::from_secs_f64(args.timeout)).await?;
    let crawler = Crawler::new(PathBuf::from(&args.out_dir), args.level, args.exclude);
    let crawl_result = crawler.crawl(&renderer, &root).await;
    renderer.close().await;

    let records = crawl_result?;
    info!("Crawled {} page(s)", records.len());

    let assembler = PdfAssembler::new();
    assembler.assemble(&records, Path::new(&args.output)).await?;

    info!("Done: {}", args.output.green());
    Ok(())
}

#[tokio::main]
async fn main() {
    // Set up logging with chromiumoxide errors suppressed
    let filter = EnvFilter::from_default_env()
        .add_directive("chromiumoxide::conn=off".parse().unwrap())
        .add_directive("chromiumoxide::handler=off".parse().unwrap())
        .add_directive("site2pdf=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{}", format!("Error: {}", e).red());
        process::exit(1);
    }
}
