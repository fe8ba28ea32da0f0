use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use stream_resolver::media::{prefer_subtitle_language, sort_by_preferred_quality};
use stream_resolver::{EmbedRequest, ResolveError, Resolver, ResolverConfig, StreamDescriptor};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Embed page URL(s) to resolve
    #[arg(short, long, required = true, num_args = 1..)]
    url: Vec<String>,

    /// Referer of the page that embedded the player
    #[arg(long)]
    referer: Option<String>,

    /// Extra request header, `Name: Value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// TOML configuration file
    #[arg(short, long, env = "RESOLVER_CONFIG")]
    config: Option<PathBuf>,

    /// FlareSolverr endpoint for browser challenge solves
    #[arg(long, env = "FLARESOLVERR_URL")]
    flaresolverr: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Overall deadline in seconds when resolving several URLs
    #[arg(long)]
    deadline: Option<u64>,

    /// Quality label to list first, e.g. 720p
    #[arg(long)]
    prefer: Option<String>,

    /// Subtitle language to list first, e.g. english
    #[arg(long)]
    sub_lang: Option<String>,

    /// Output the result in JSON format
    #[arg(long)]
    json: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "stream_resolver=debug,resolver_cli=debug",
        _ => "stream_resolver=trace,resolver_cli=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<ResolverConfig> {
    let base = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => ResolverConfig::default(),
    };
    let overlay = json!({
        "flaresolverr_url": args.flaresolverr,
        "request_timeout_secs": args.timeout,
    });
    base.with_overrides(overlay)
        .context("Failed to apply command line overrides")
}

fn build_request(url: &str, args: &Args) -> anyhow::Result<EmbedRequest> {
    let mut request = EmbedRequest::new(url);
    if let Some(referer) = &args.referer {
        request = request.with_referer(referer);
    }
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header {header:?}, expected `Name: Value`"))?;
        request = request.with_header(name.trim(), value.trim());
    }
    Ok(request)
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&[
                "▹▹▹▹▹",
                "▸▹▹▹▹",
                "▹▸▹▹▹",
                "▹▹▸▹▹",
                "▹▹▹▸▹",
                "▹▹▹▹▸",
                "▪▪▪▪▪",
            ]),
    );
    pb.set_message(message);
    pb
}

fn print_stream(stream: &StreamDescriptor) {
    println!("\n{}", stream.quality.green().bold());
    println!("  {}: {}", "Format".yellow(), stream.format.as_str().cyan());
    println!("  {}: {}", "URL".yellow(), stream.url.as_str().blue());
    if !stream.headers.is_empty() {
        println!("  {}:", "Headers".yellow());
        for (name, value) in &stream.headers {
            println!("    {}: {}", name.green(), value.cyan());
        }
    }
    for track in &stream.subtitles {
        println!("  {}: {} {}", "Subtitle".yellow(), track.label.cyan(), track.url.blue());
    }
    for track in &stream.audio_tracks {
        println!("  {}: {} {}", "Audio".yellow(), track.label.cyan(), track.url.blue());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    tracing::debug!(?config, "loaded configuration");
    let requests = args
        .url
        .iter()
        .map(|url| build_request(url, &args))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let cancel = CancellationToken::new();
    let resolver = Resolver::builder(config)
        .cancellation(cancel.clone())
        .build()
        .context("Failed to set up resolver")?;

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let pb = spinner("Resolving embed pages...");
    let mut streams = if let [request] = requests.as_slice() {
        resolver
            .resolve(request)
            .await
            .with_context(|| format!("Failed to resolve {}", request.url))?
    } else {
        resolver
            .resolve_all(&requests, args.deadline.map(Duration::from_secs))
            .await
    };
    pb.finish_and_clear();

    if streams.is_empty() {
        return Err(ResolveError::NoStreamsFound.into());
    }
    if let Some(prefer) = &args.prefer {
        sort_by_preferred_quality(&mut streams, prefer);
    }
    if let Some(language) = &args.sub_lang {
        for stream in &mut streams {
            prefer_subtitle_language(&mut stream.subtitles, language);
        }
    }

    if args.json {
        let json = serde_json::to_string_pretty(&streams).context("Failed to serialize streams")?;
        println!("{json}");
    } else {
        println!("{} {}", "Streams:".green().bold(), streams.len().to_string().cyan());
        for stream in &streams {
            print_stream(stream);
        }
    }

    Ok(())
}
