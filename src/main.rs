use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use figma_harvest::error_codes::{
    envelope_for, find_coded_error, CodedError, E_FIGMA_TARGET, E_FRAME_RENDER, E_MISSING_TOKEN,
    E_TREE_FILE,
};
use figma_harvest::workflow::components::ComponentCounts;
use figma_harvest::workflow::config::{
    token_from_env, FetchConfig, DEFAULT_ASSET_ROOT, DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_PUBLIC_PREFIX,
};
use figma_harvest::workflow::figma_client::{
    build_http_client, normalize_node_id, parse_figma_file_context, FigmaClient,
};
use figma_harvest::workflow::frame_render::fetch_frame_render;
use figma_harvest::workflow::pipeline::{
    analyze_tree, fetch_tree_or_degrade, parse_design_tree, run_pipeline, NoopObserver,
    PipelineObserver, PipelineRequest, SnapshotObserver, TreeAnalysis,
};
use figma_harvest::workflow::source::DesignSource;
use figma_harvest::workflow::tokens::DesignTokenSummary;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const GIT_HASH: Option<&str> = option_env!("FIGMA_HARVEST_GIT_HASH");

#[derive(Debug, Parser)]
#[command(name = "figma-harvest", version)]
#[command(about = "Harvest design tokens, components and image assets from a Figma subtree")]
struct Cli {
    /// Print machine-readable JSON (results on stdout, error envelope on stderr).
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch a subtree from Figma, download its image assets and write the
    /// annotated result into a run folder.
    Extract(ExtractArgs),
    /// Run the offline passes over a tree JSON file already on disk.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Figma file URL or raw file key.
    #[arg(long = "figma")]
    figma: String,
    /// Subtree root; taken from the URL's node-id when omitted.
    #[arg(long = "node-id")]
    node_id: Option<String>,
    /// Label for the asset folder; defaults to the subtree's name.
    #[arg(long = "group")]
    group: Option<String>,
    #[arg(long = "token", env = "FIGMA_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long = "output-folder", default_value = "./exports")]
    output_folder: PathBuf,
    #[arg(long = "asset-root", env = "FIGMA_HARVEST_ASSET_ROOT", default_value = DEFAULT_ASSET_ROOT)]
    asset_root: PathBuf,
    #[arg(long = "public-prefix", env = "FIGMA_HARVEST_PUBLIC_PREFIX", default_value = DEFAULT_PUBLIC_PREFIX)]
    public_prefix: String,
    /// Also rasterize the whole subtree as `frame.png`.
    #[arg(long = "render-frame", default_value_t = false)]
    render_frame: bool,
    /// Write raw and annotated tree snapshots here.
    #[arg(long = "dump-dir")]
    dump_dir: Option<PathBuf>,
    #[arg(long = "max-concurrent-downloads", default_value_t = DEFAULT_MAX_CONCURRENT_DOWNLOADS)]
    max_concurrent_downloads: usize,
    #[arg(long = "timeout-seconds", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    timeout_seconds: u64,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// A bare node or a `/files/{key}/nodes` response.
    #[arg(long = "tree-file")]
    tree_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = GIT_HASH.unwrap_or("unknown"),
        "figma-harvest starting"
    );

    let result = match &cli.command {
        Commands::Extract(args) => run_extract(args, cli.json).await,
        Commands::Analyze(args) => run_analyze(args, cli.json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_failure(&err, cli.json),
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,figma_harvest=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report_failure(err: &anyhow::Error, json: bool) -> ExitCode {
    error!("{err:#}");
    if json {
        match serde_json::to_string(&envelope_for(err)) {
            Ok(body) => eprintln!("{body}"),
            Err(_) => eprintln!("error: {err:#}"),
        }
    } else {
        eprintln!("error: {err:#}");
    }
    let code = find_coded_error(err).map_or(1, |coded| coded.kind.exit_code());
    ExitCode::from(code)
}

async fn run_extract(args: &ExtractArgs, json: bool) -> Result<()> {
    let started = Instant::now();
    let (file_key, url_node_id) = parse_figma_file_context(&args.figma).ok_or_else(|| {
        CodedError::usage(
            E_FIGMA_TARGET,
            format!(
                "could not parse Figma file key from '{}'; provide a valid Figma URL or raw file key",
                args.figma
            ),
        )
    })?;
    let node_id = args
        .node_id
        .clone()
        .and_then(normalize_node_id)
        .or(url_node_id)
        .ok_or_else(|| {
            CodedError::usage(
                E_FIGMA_TARGET,
                "a node id is required; pass --node-id or a URL with a node-id parameter",
            )
        })?;
    let token = args
        .token
        .clone()
        .filter(|token| !token.trim().is_empty())
        .or_else(token_from_env)
        .ok_or_else(|| {
            CodedError::usage(
                E_MISSING_TOKEN,
                "FIGMA_TOKEN (or FIGMA_ACCESS_TOKEN) is required to fetch data from the Figma API",
            )
        })?;

    let run_folder = args
        .output_folder
        .join(format!("figma-harvest-{}", Utc::now().format("%Y%m%d-%H%M%S")));
    fs::create_dir_all(&run_folder)
        .with_context(|| format!("failed to create run folder {}", run_folder.display()))?;

    let http = build_http_client(Duration::from_secs(args.timeout_seconds))
        .context("failed to create HTTP client")?;
    let source: Arc<dyn DesignSource> = Arc::new(FigmaClient::new(http, token));
    let config = FetchConfig {
        asset_root: args.asset_root.clone(),
        public_prefix: args.public_prefix.clone(),
        max_concurrent_downloads: args.max_concurrent_downloads,
        ..FetchConfig::default()
    };

    info!(file_key = %file_key, node_id = %node_id, "1/3 fetching design subtree");
    let tree = fetch_tree_or_degrade(source.as_ref(), &file_key, &node_id).await;
    let group_label = args
        .group
        .clone()
        .or_else(|| tree.as_ref().map(|node| node.name.clone()));

    info!("2/3 running extraction pipeline");
    let observer: Box<dyn PipelineObserver> = match &args.dump_dir {
        Some(dir) => Box::new(SnapshotObserver::new(dir)),
        None => Box::new(NoopObserver),
    };
    let output = run_pipeline(
        Arc::clone(&source),
        PipelineRequest {
            tree,
            file_key: file_key.clone(),
            group_label,
        },
        &config,
        observer.as_ref(),
    )
    .await;
    let output_path = run_folder.join("pipeline_output.json");
    write_json(&output_path, &output)?;

    let frame_path = if args.render_frame {
        info!("3/3 rendering whole frame");
        let render = fetch_frame_render(source.as_ref(), &file_key, &node_id, &config.frame)
            .await
            .map_err(|err| CodedError::from_transport(E_FRAME_RENDER, &err))?;
        let path = run_folder.join("frame.png");
        fs::write(&path, &render.bytes)
            .with_context(|| format!("failed to write frame render {}", path.display()))?;
        Some((path, render.scale, render.byte_len()))
    } else {
        info!("3/3 frame render skipped");
        None
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Run folder: {}", run_folder.display());
    println!("Pipeline output: {}", output_path.display());
    if output.is_degraded() {
        println!("Design tree unavailable; wrote degraded output.");
    }
    print_token_summary(&output.token_summary);
    print_component_counts(&output.component_summary.summary);
    println!("Assets stored: {}", output.asset_map.len());
    for (node_id, path) in &output.asset_map {
        println!("  {node_id} -> {path}");
    }
    if let Some((path, scale, byte_len)) = frame_path {
        println!(
            "Frame render: {} (scale {scale}, {byte_len} bytes)",
            path.display()
        );
    }
    println!("Total elapsed: {} ms", started.elapsed().as_millis());
    Ok(())
}

fn run_analyze(args: &AnalyzeArgs, json: bool) -> Result<()> {
    let raw = fs::read_to_string(&args.tree_file).map_err(|err| {
        CodedError::usage(
            E_TREE_FILE,
            format!("failed to read tree file {}: {err}", args.tree_file.display()),
        )
    })?;
    let tree = parse_design_tree(&raw).ok_or_else(|| {
        CodedError::usage(
            E_TREE_FILE,
            format!(
                "{} is not a Figma node or nodes response",
                args.tree_file.display()
            ),
        )
    })?;
    let analysis = analyze_tree(Some(&tree));

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }
    print_analysis(&tree.name, &analysis);
    Ok(())
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

fn print_analysis(name: &str, analysis: &TreeAnalysis) {
    println!("Tree: {name} ({} nodes)", analysis.node_count);
    print_token_summary(&analysis.token_summary);
    print_component_counts(&analysis.component_summary.summary);
    println!("Image assets: {}", analysis.image_assets.len());
    for target in &analysis.image_assets {
        println!("  {} ({})", target.id, target.name);
    }
}

fn print_token_summary(tokens: &DesignTokenSummary) {
    println!("Colors: {}", join_or_none(&tokens.colors));
    println!("Fonts: {}", join_or_none(&tokens.fonts));
    println!("Font families: {}", join_or_none(&tokens.font_families()));
    if !tokens.gradients.is_empty() {
        println!("Gradients: {}", tokens.gradients.join(", "));
    }
    let spacing: Vec<String> = tokens
        .spacing_scale
        .iter()
        .map(|value| value.to_string())
        .collect();
    println!("Spacing scale: {}", join_or_none(&spacing));
    println!(
        "Effects: {} shadows, {} blurs",
        tokens.effects.shadows, tokens.effects.blurs
    );
}

fn print_component_counts(counts: &ComponentCounts) {
    println!(
        "Components: {} buttons, {} cards, {} navigation, {} forms, {} icons",
        counts.button_count,
        counts.card_count,
        counts.navigation_count,
        counts.form_count,
        counts.icon_count
    );
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "none".to_owned()
    } else {
        values.join(", ")
    }
}
