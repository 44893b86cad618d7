use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rand::Rng;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wait_timeout::ChildExt;

use match_trial_viewer::client::HttpClient;
use match_trial_viewer::config::ViewerConfig;
use match_trial_viewer::form::TrialForm;
use match_trial_viewer::handoff::spawn_new_trial_window;
use match_trial_viewer::session::{DrawOutcome, DrawRequest, SessionState, TrialSession};
use match_trial_viewer::urls::{PageLocation, ServiceEndpoints};
use match_trial_viewer::util::{
    abs_path, default_sidecar_for, ensure_parent_dir, id_suffix, slugify, timestamp_compact,
    timestamp_iso, write_json_pretty,
};

const VIEWER_PAGE: &str = "view/match-trial.html";

const FORM_HELP: &str = r##"Trial form JSON (camelCase, every field optional):
  pRenderParametersUrl / qRenderParametersUrl  must reference a render-parameters resource
  fdSize, minScale, maxScale, steps            SIFT feature extraction
  pClipPosition, clipPixels                    clip is skipped when pClipPosition is "NO CLIP"
  fillWithNoise                                true, false, or omitted
  matching                                     primary match derivation (modelType,
                                               regularizerModelType, interpolatedModelLambda,
                                               rod, iterations, maxEpsilon, minInlierRatio,
                                               minNumInliers, maxTrust, filter,
                                               fullScaleCoverageRadius)
  includeGeometric                             send the geometric descriptor block
  geometric                                    descriptor settings plus its own "matching"
                                               (rod is never sent for this pass)

Notes:
- the regularizer and lambda are sent only when regularizerModelType is not "NOT INTERPOLATED"
  and interpolatedModelLambda is present.
- a blank geometric renderFilterListName is omitted.

Defaults:
"##;

#[derive(Parser, Debug)]
#[command(
    name = "match-trial",
    version,
    about = "Load, render, step through, create, and save match trials between two rendered tiles"
)]
struct Cli {
    /// JSON config file (defaults < file < MATCH_TRIAL_* env < flags)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Service base URL, e.g. http://host:8080/render-ws/v1
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Owner of the match trial endpoints
    #[arg(long, global = true)]
    owner: Option<String>,
    /// Scale tile images are rendered at for display
    #[arg(long, global = true)]
    view_scale: Option<f64>,
    /// Pixels around and between the two tile cells
    #[arg(long, global = true)]
    cell_margin: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Load a trial and render its matches to a PNG with a metadata sidecar
    Show(ShowArgs),
    /// Run a new trial from a form JSON file
    Create(CreateArgs),
    /// Delete a trial
    Delete(TrialArgs),
    /// Save a single consensus set trial to a match collection
    Save(SaveArgs),
    /// Open a new trial context pre-filled with an existing trial's parameters
    #[command(name = "new-trial")]
    NewTrial(NewTrialArgs),
    /// Describe the trial form JSON accepted by `create`
    #[command(name = "form-help")]
    FormHelp,
}

#[derive(Args, Debug, Clone)]
struct TrialArgs {
    /// Trial id (positional fallback)
    trial: Option<String>,
    /// Trial id
    #[arg(long)]
    trial_id: Option<String>,
    /// Viewer page URL carrying matchTrialId
    #[arg(long)]
    page: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct RenderArgs {
    /// Highlight only match N (1-based; -1 is the last match) instead of drawing all matches
    #[arg(long, allow_hyphen_values = true)]
    step: Option<i64>,
    /// Draw matches as lines between tiles instead of points
    #[arg(long, action = ArgAction::SetTrue)]
    lines: bool,
    /// Output PNG path
    #[arg(long)]
    out: Option<PathBuf>,
    /// Custom metadata sidecar path (default: <out>.json)
    #[arg(long)]
    sidecar: Option<PathBuf>,
    /// Disable metadata sidecar generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_sidecar: bool,
    /// Print metadata JSON to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct ShowArgs {
    #[command(flatten)]
    trial: TrialArgs,
    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Trial form JSON path, or - for stdin
    #[arg(long)]
    form: String,
    /// Viewer page URL the new trial id is written into
    #[arg(long)]
    page: Option<String>,
    /// Render the new trial once it is created
    #[arg(long, action = ArgAction::SetTrue)]
    show: bool,
    #[command(flatten)]
    render: RenderArgs,
}

#[derive(Args, Debug)]
struct SaveArgs {
    #[command(flatten)]
    trial: TrialArgs,
    /// Match collection to save into
    #[arg(long)]
    collection: String,
    /// Owner of the match collection (default: configured owner)
    #[arg(long)]
    collection_owner: Option<String>,
}

#[derive(Args, Debug)]
struct NewTrialArgs {
    #[command(flatten)]
    trial: TrialArgs,
    /// Where to write the pre-filled form JSON
    #[arg(long)]
    out: Option<PathBuf>,
    /// Milliseconds the new context waits for the handed off parameters
    #[arg(long, default_value_t = 5000)]
    wait_ms: u64,
    /// Open the new trial page in a browser
    #[arg(long, action = ArgAction::SetTrue)]
    open: bool,
    /// Seconds to wait for the browser launcher
    #[arg(long, default_value_t = 10)]
    open_timeout: u64,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Show(args) => command_show(&config, args),
        Commands::Create(args) => command_create(&config, args),
        Commands::Delete(args) => command_delete(&config, args),
        Commands::Save(args) => command_save(&config, args),
        Commands::NewTrial(args) => command_new_trial(&config, args),
        Commands::FormHelp => print_form_help(),
    }
}

fn resolve_config(cli: &Cli) -> Result<ViewerConfig> {
    let mut config = ViewerConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(owner) = &cli.owner {
        config.owner = owner.clone();
    }
    if let Some(view_scale) = cli.view_scale {
        config.view_scale = view_scale;
    }
    if let Some(cell_margin) = cli.cell_margin {
        config.cell_margin = cell_margin;
    }
    Ok(config)
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({"name": "show", "description": "Render a trial's matches to PNG with a metadata sidecar."}),
        json!({"name": "create", "description": "Run a new trial from a form JSON file."}),
        json!({"name": "delete", "description": "Delete a trial."}),
        json!({"name": "save", "description": "Save a single consensus set to a match collection."}),
        json!({"name": "new-trial", "description": "Pre-fill a new trial form from an existing trial."}),
        json!({"name": "form-help", "description": "Describe the trial form JSON."}),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn print_form_help() -> Result<()> {
    print!("{FORM_HELP}");
    println!("{}", serde_json::to_string_pretty(&TrialForm::default())?);
    Ok(())
}

fn new_session(config: &ViewerConfig, page: PageLocation) -> TrialSession<HttpClient> {
    let endpoints = ServiceEndpoints::new(&config.base_url, &config.owner);
    let client = HttpClient::new(endpoints, config.request_timeout());
    let images = Arc::new(client.clone());
    TrialSession::new(client, images, config.clone(), page)
}

/// Viewer page next to the service, e.g. `http://host/render-ws/view/match-trial.html`.
fn default_page(config: &ViewerConfig) -> Result<PageLocation> {
    let base = config.base_url.trim_end_matches('/');
    let root = base.strip_suffix("/v1").unwrap_or(base);
    PageLocation::parse(&format!("{root}/{VIEWER_PAGE}"))
        .with_context(|| format!("cannot build viewer page from base URL {base}"))
}

fn resolve_page(config: &ViewerConfig, args: &TrialArgs) -> Result<PageLocation> {
    let page = match &args.page {
        Some(raw) => PageLocation::parse(raw).with_context(|| format!("invalid page URL: {raw}"))?,
        None => default_page(config)?,
    };
    match args.trial_id.as_deref().or(args.trial.as_deref()) {
        Some(trial_id) => Ok(page.with_trial_id(trial_id)),
        None if page.trial_id().is_some() => Ok(page),
        None => bail!("a trial id is required (positional, --trial-id, or --page with matchTrialId)"),
    }
}

fn load_session(config: &ViewerConfig, args: &TrialArgs) -> Result<TrialSession<HttpClient>> {
    let page = resolve_page(config, args)?;
    let mut session = new_session(config, page.clone());
    if session.navigate(page) != SessionState::Loaded {
        bail!(
            "failed to load match trial {}",
            session.trial_id().unwrap_or("?")
        );
    }
    Ok(session)
}

fn default_render_out(config: &ViewerConfig, trial_id: &str) -> PathBuf {
    let slug = slugify(id_suffix(trial_id, 7));
    let ts = timestamp_compact();
    let rand = rand::thread_rng().gen_range(1000..9999);
    config
        .out_dir
        .join("show")
        .join(format!("trial-{slug}-{ts}-{rand}.png"))
}

fn render_session(
    config: &ViewerConfig,
    session: &mut TrialSession<HttpClient>,
    args: &RenderArgs,
) -> Result<Value> {
    if args.lines {
        let (_, outcome) = session.toggle_lines_and_points();
        debug!(?outcome, "switched to line markers");
    }
    let request = match args.step {
        Some(step) => session.jump_to(step),
        None => DrawRequest::AllMatches,
    };
    match session.draw_when_ready(request) {
        DrawOutcome::Drawn => {}
        DrawOutcome::Deferred => bail!("tile images did not load, nothing was drawn"),
        DrawOutcome::NotLoaded => bail!("no match trial is loaded"),
    }
    let canvas = session
        .canvas()
        .ok_or_else(|| anyhow!("drawing produced no canvas"))?;

    let trial_id = session.trial_id().unwrap_or_default().to_string();
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| default_render_out(config, &trial_id));
    ensure_parent_dir(&out)?;
    canvas
        .save(&out)
        .with_context(|| format!("failed to write PNG: {}", out.display()))?;

    let result = session.result();
    let mut payload = json!({
        "generated_at": timestamp_iso(),
        "trial_id": trial_id,
        "trial_label": session.trial_label(),
        "page": session.page().as_str(),
        "image_path": abs_path(&out).display().to_string(),
        "width": canvas.width(),
        "height": canvas.height(),
        "match_info": session.match_info(),
        "draw_match_lines": session.navigation().draw_match_lines,
        "match_count": result.map(|r| r.match_count()),
        "consensus_set_sizes": result.map(|r| r.consensus_set_sizes()),
        "summary": session.summary(),
    });

    if !args.no_sidecar {
        let sidecar = args
            .sidecar
            .clone()
            .unwrap_or_else(|| default_sidecar_for(&out));
        payload["sidecar_path"] = json!(abs_path(&sidecar).display().to_string());
        write_json_pretty(&sidecar, &payload)?;
    }
    info!(path = %out.display(), match_info = session.match_info(), "rendered match trial");
    Ok(payload)
}

fn print_render(payload: &Value, args: &RenderArgs) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string(payload)?);
    } else {
        let output_path = payload
            .get("image_path")
            .and_then(Value::as_str)
            .unwrap_or_default();
        println!("{output_path}");
    }
    Ok(())
}

fn command_show(config: &ViewerConfig, args: ShowArgs) -> Result<()> {
    let mut session = load_session(config, &args.trial)?;
    let payload = render_session(config, &mut session, &args.render)?;
    print_render(&payload, &args.render)
}

fn load_form(path: &str) -> Result<TrialForm> {
    let raw = if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read form from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read form file: {path}"))?
    };
    serde_json::from_str(&raw).context("invalid trial form JSON")
}

fn command_create(config: &ViewerConfig, args: CreateArgs) -> Result<()> {
    let form = load_form(&args.form)?;
    let page = match &args.page {
        Some(raw) => PageLocation::parse(raw).with_context(|| format!("invalid page URL: {raw}"))?,
        None => default_page(config)?,
    };
    let mut session = new_session(config, page);
    let trial_id = session.run_trial(&form)?;

    if !args.show {
        if args.render.json {
            println!(
                "{}",
                serde_json::to_string(&json!({
                    "trial_id": trial_id,
                    "page": session.page().as_str(),
                }))?
            );
        } else {
            println!("{trial_id}");
        }
        return Ok(());
    }

    let page = session.page().clone();
    if session.navigate(page) != SessionState::Loaded {
        bail!("created match trial {trial_id} but failed to load it");
    }
    let payload = render_session(config, &mut session, &args.render)?;
    print_render(&payload, &args.render)
}

fn command_delete(config: &ViewerConfig, args: TrialArgs) -> Result<()> {
    let mut session = load_session(config, &args)?;
    if !session.delete_trial() {
        bail!(
            "failed to delete match trial {}",
            session.trial_id().unwrap_or("?")
        );
    }
    println!("{}", session.trial_label());
    Ok(())
}

fn command_save(config: &ViewerConfig, args: SaveArgs) -> Result<()> {
    let session = load_session(config, &args.trial)?;
    let owner = args
        .collection_owner
        .clone()
        .unwrap_or_else(|| config.owner.clone());
    let saved = session.save_trial_results_to_collection(&owner, &args.collection)?;
    println!("{}", saved.message);
    println!("{}", saved.tile_pair_url);
    Ok(())
}

fn command_new_trial(config: &ViewerConfig, args: NewTrialArgs) -> Result<()> {
    let session = load_session(config, &args.trial)?;
    let wait = Duration::from_millis(args.wait_ms);
    let ((page, window), outcome) = session.open_new_trial_window(|endpoint| {
        let page = endpoint.page().clone();
        (page, spawn_new_trial_window(endpoint, Duration::ZERO, wait))
    });
    let form = window
        .join()
        .map_err(|_| anyhow!("new trial window stopped unexpectedly"))?;
    if outcome.is_none() {
        warn!("new trial form was not pre-filled");
    }

    let out = args.out.clone().unwrap_or_else(|| {
        config
            .out_dir
            .join("forms")
            .join(format!("new-trial-{}.json", timestamp_compact()))
    });
    write_json_pretty(&out, &serde_json::to_value(&form)?)?;

    if args.open {
        launch_browser(page.as_str(), Duration::from_secs(args.open_timeout.max(1)));
    }
    println!("{}", abs_path(&out).display());
    println!("{}", page.as_str());
    Ok(())
}

/// Best effort; a launcher that fails or hangs is logged and left alone.
fn launch_browser(url: &str, timeout: Duration) {
    let launcher = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let mut cmd = Command::new(launcher);
    cmd.arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    match cmd.spawn() {
        Ok(mut child) => match child.wait_timeout(timeout) {
            Ok(Some(status)) if status.success() => info!(url, "opened new trial page"),
            Ok(Some(status)) => warn!(launcher, code = ?status.code(), "browser launcher failed"),
            Ok(None) => warn!(launcher, "browser launcher still running after {}s", timeout.as_secs()),
            Err(err) => warn!(launcher, error = %err, "failed waiting for browser launcher"),
        },
        Err(err) => warn!(launcher, error = %err, "failed to start browser launcher"),
    }
}
