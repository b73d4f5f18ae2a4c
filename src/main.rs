//! reunion - command-line client for the reunion countdown services
#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use reunion::api::ImageIndexApi;
use reunion::media::{BatchSummary, MediaEvents};
use reunion::models::{ADVENT_DAYS, AdventView, HasImageKey, ImageKey, PhotoFilter};
use reunion::{AdventBoard, Config, HttpMediaClient, MediaEvent, MediaResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match parse_args()? {
        Command::Advent { view, wait } => advent_cli(view, wait).await,
        Command::Photos {
            filter,
            limit,
            wait,
        } => photos_cli(filter, limit, wait).await,
        Command::Image { key, out } => image_cli(&key, out).await,
        Command::Config { init } => show_config(init),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// CLI commands
enum Command {
    Advent {
        view: AdventView,
        wait: bool,
    },
    Photos {
        filter: PhotoFilter,
        limit: usize,
        wait: bool,
    },
    Image {
        key: ImageKey,
        out: Option<PathBuf>,
    },
    Config {
        init: bool,
    },
    Help,
    Version,
}

fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a String> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
}

fn has_flag(args: &[String], names: &[&str]) -> bool {
    args.iter().any(|a| names.contains(&a.as_str()))
}

/// First argument after the command that is not a flag
fn positional(args: &[String]) -> Option<&String> {
    args.get(2).filter(|a| !a.starts_with('-'))
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Ok(Command::Help);
    }

    let wait = has_flag(&args, &["--wait", "-w"]);

    match args[1].as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),

        "advent" => {
            let view = match positional(&args) {
                Some(name) => AdventView::from_str(name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown view: {name} (for-me or by-me)"))?,
                None => AdventView::default(),
            };
            Ok(Command::Advent { view, wait })
        }

        "photos" => {
            let filter = match positional(&args) {
                Some(name) => PhotoFilter::from_str(name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown filter: {name} (all, by-me, for-me)"))?,
                None => PhotoFilter::default(),
            };
            let limit = flag_value(&args, &["--limit", "-l"])
                .and_then(|s| s.parse().ok())
                .unwrap_or(12);
            Ok(Command::Photos {
                filter,
                limit,
                wait,
            })
        }

        "image" => {
            let key = positional(&args)
                .map(|k| ImageKey::new(k.as_str()))
                .ok_or_else(|| anyhow::anyhow!("Missing image key"))?;
            let out = flag_value(&args, &["--out", "-o"]).map(PathBuf::from);
            Ok(Command::Image { key, out })
        }

        "config" => Ok(Command::Config {
            init: has_flag(&args, &["--init"]),
        }),

        other => Err(anyhow::anyhow!(
            "Unknown command: {other}\nRun 'reunion --help' for usage"
        )),
    }
}

fn print_help() {
    let config_path = reunion::paths::config_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"💌 reunion - client for the reunion countdown services

USAGE:
    reunion [COMMAND]

COMMANDS:
    advent [for-me|by-me] [OPTIONS]    List advent entries and load thumbnails
      Options:
        -w, --wait                     Wait for thumbnails still being generated

    photos [all|by-me|for-me] [OPTIONS]
                                       List one page of photos and load thumbnails
      Options:
        -l, --limit <n>                Photos per page (default: 12)
        -w, --wait                     Wait for thumbnails still being generated

    image <key> [OPTIONS]              Download a full-resolution image
      Options:
        -o, --out <path>               Output file (default: downloads dir)

    config [--init]                    Show the active configuration
      Options:
        --init                         Write a default config file if none exists

OPTIONS:
    -h, --help                         Show this help message
    -v, --version                      Show version information

ENVIRONMENT:
    {}              Session id (overrides config)
    RUST_LOG                           Log filter (default: warn)

CONFIG:
    {}
"#,
        reunion::config::SESSION_ENV,
        config_path
    );
}

fn print_version() {
    println!("reunion {}", reunion::VERSION);
}

fn client() -> Result<(Config, HttpMediaClient)> {
    let config = Config::load()?;
    let client = HttpMediaClient::from_config(&config).context("Failed to build HTTP client")?;
    Ok((config, client))
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "\n🖼  {} thumbnails in {} waves: {} ready, {} generating, {} failed",
        summary.requested, summary.waves, summary.ready, summary.retrying, summary.failed
    );
}

/// Upper bound on how long a full retry cycle can take
fn retry_budget(config: &Config) -> Duration {
    let policy = config.media.retry_policy();
    (1..=policy.max_retries())
        .filter_map(|attempt| policy.delay_for(attempt))
        .sum::<Duration>()
        + Duration::from_secs(config.request_timeout_secs)
}

/// Wait until every key in `pending` resolves or stalls.
async fn wait_for_retries(events: &mut MediaEvents, mut pending: HashSet<ImageKey>, budget: Duration) {
    if pending.is_empty() {
        return;
    }
    println!("⏳ Waiting for {} thumbnails to be generated...", pending.len());

    let drained = tokio::time::timeout(budget, async {
        while !pending.is_empty() {
            let Some(event) = events.next().await else {
                break;
            };
            match &event {
                MediaEvent::ThumbnailReady { key } => {
                    if pending.remove(key) {
                        println!("  ✓ {key}");
                    }
                }
                MediaEvent::ThumbnailStalled { key, attempts } => {
                    if pending.remove(key) {
                        println!("  ✗ {key} (gave up after {attempts} retries)");
                    }
                }
                MediaEvent::ThumbnailFailed { key, error } => {
                    if pending.remove(key) {
                        println!("  ✗ {key}: {error}");
                    }
                }
                MediaEvent::RetryScheduled { .. } | MediaEvent::FullImageReady { .. } => {}
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!("Timed out waiting for thumbnails");
    }
}

fn thumbnail_label(handle: Option<reunion::LocalHandle>) -> String {
    handle.map_or_else(
        || "🎁 (no preview)".to_string(),
        |h| format!("{} ({} bytes, {})", h.url(), h.size(), h.content_type()),
    )
}

async fn advent_cli(view: AdventView, wait: bool) -> Result<()> {
    let (config, client) = client()?;
    let mut board = AdventBoard::new(client, view, &config.media);

    let summary = board.load().await.context("Failed to load advent entries")?;
    tracing::info!("Loaded {} advent entries", board.entries().len());

    println!("🎄 Advent calendar ({})", view.path().replace('_', " "));
    println!("{}", "─".repeat(60));

    if board.entries().is_empty() {
        println!("No entries yet.");
    }

    if wait {
        let pending: HashSet<ImageKey> = board
            .entries()
            .iter()
            .filter_map(|entry| entry.image_key())
            .filter(|key| board.media().thumbnail(key).is_none() && !board.media().is_stalled(key))
            .cloned()
            .collect();
        wait_for_retries(board.events_mut(), pending, retry_budget(&config)).await;
    }

    for entry in board.entries() {
        println!(
            "\nDay {:>2} · {} · {}",
            entry.day, entry.kind, entry.title
        );
        if !entry.description.is_empty() {
            println!("  {}", entry.description);
        }
        println!("  {}", thumbnail_label(board.thumbnail(entry)));
    }

    println!(
        "\n🚪 {}/{} doors filled",
        board.filled_days(),
        ADVENT_DAYS.count()
    );
    print_summary(&summary);
    board.close();
    Ok(())
}

async fn photos_cli(filter: PhotoFilter, limit: usize, wait: bool) -> Result<()> {
    let (config, client) = client()?;

    let page = client
        .list_images(filter, limit, None)
        .await
        .context("Failed to list photos")?;
    let has_more = page.has_more();
    let photos = page.sorted_newest_first();
    tracing::info!("Listed {} photos", photos.len());

    let (media, mut events) = MediaResolver::new(client, &config.media);
    let summary = media.load_batch(&photos).await;

    if wait {
        let pending = photos
            .iter()
            .filter_map(|photo| photo.image_key())
            .filter(|key| media.thumbnail(key).is_none() && !media.is_stalled(key))
            .cloned()
            .collect();
        wait_for_retries(&mut events, pending, retry_budget(&config)).await;
    }

    println!("📸 Our memories");
    println!("{}", "─".repeat(60));

    for photo in &photos {
        let title = photo.title.as_deref().unwrap_or("Untitled");
        let when = photo
            .uploaded_at
            .map_or_else(|| "unknown date".to_string(), |t| t.format("%Y-%m-%d").to_string());
        println!("\n{title} · {when}");
        if let Some(by) = &photo.uploaded_by {
            println!("  by {by}");
        }
        if !photo.image_tags.is_empty() {
            println!("  #{}", photo.image_tags.join(" #"));
        }
        println!(
            "  {}",
            thumbnail_label(photo.image_key().and_then(|key| media.thumbnail(key)))
        );
    }

    print_summary(&summary);
    if has_more {
        println!("More photos available (use --limit to see more)");
    }

    media.release_all();
    Ok(())
}

fn default_output(key: &ImageKey) -> Result<PathBuf> {
    let name: String = key
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    Ok(reunion::paths::downloads_dir()?.join(name))
}

async fn image_cli(key: &ImageKey, out: Option<PathBuf>) -> Result<()> {
    let (config, client) = client()?;
    let (media, _events) = MediaResolver::new(client, &config.media);

    let result = async {
        let handle = media
            .ensure_full_image(key)
            .await
            .with_context(|| format!("Failed to fetch image {key}"))?;
        let bytes = media
            .handles()
            .resolve(&handle)
            .context("Image was released before it could be saved")?;

        let path = match out {
            Some(path) => path,
            None => default_output(key)?,
        };
        std::fs::write(&path, &bytes[..])
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Wrote {} bytes to {}", bytes.len(), path.display());

        println!(
            "✓ Saved {} ({} bytes, {}) to {}",
            key,
            handle.size(),
            handle.content_type(),
            path.display()
        );
        Ok::<(), anyhow::Error>(())
    }
    .await;

    media.release_all();
    result
}

fn show_config(init: bool) -> Result<()> {
    let path = reunion::paths::config_path()?;
    let mut shown = Config::load()?;

    if init && !path.exists() {
        Config::default().save()?;
        println!("✓ Wrote default config");
    }

    println!("# {}", path.display());
    if !path.exists() {
        println!("# (not found, showing defaults)");
    }
    if shown.session_id.is_some() {
        shown.session_id = Some("<hidden>".to_string());
    }
    print!("{}", toml::to_string_pretty(&shown).context("Failed to serialize config")?);
    Ok(())
}
