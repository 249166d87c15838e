mod config;
mod coords;
mod device;
mod error;
mod extract;
mod hierarchy;
mod runner;
mod server;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use config::Settings;
use device::HarmonyDevice;
use rmcp::{transport::stdio, ServiceExt};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "harmony-bridge",
    version,
    about = "MCP tool server for driving HarmonyOS devices through hdc"
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, action = ArgAction::SetTrue, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the device tools over MCP stdio
    Serve,
    /// Print the exposed tools in JSON
    Tools,
    /// Dump the current screen layout once and print the element report
    Layout(LayoutArgs),
    /// Extract elements from a saved layout snapshot file
    Parse(ParseArgs),
    /// Resolve coordinate text like "(277, 168)" to x/y
    Resolve {
        /// Text containing an `x, y` pair
        text: String,
    },
    /// Check that hdc is installed and reachable
    Doctor,
}

#[derive(Args, Debug)]
struct LayoutArgs {
    /// Print the element list as JSON instead of the text report
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    /// Also write the JSON payload to this path
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ParseArgs {
    /// Snapshot file produced by `uitest dumpLayout`
    file: PathBuf,
    /// Print the element list as JSON instead of the text report
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = cli.settings;
    match cli.command {
        Commands::Serve => command_serve(settings),
        Commands::Tools => print_tools(),
        Commands::Layout(args) => command_layout(settings, args),
        Commands::Parse(args) => command_parse(settings, args),
        Commands::Resolve { text } => command_resolve(&text),
        Commands::Doctor => command_doctor(settings),
    }
}

// stdout carries the MCP transport, so logs always go to stderr.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_device(settings: Settings) -> HarmonyDevice {
    let bridge = runner::HdcBridge::from_settings(&settings);
    tracing::debug!(program = bridge.program(), prefix = ?bridge.prefix(), "configured hdc bridge");
    HarmonyDevice::new(Arc::new(bridge), settings)
}

fn command_serve(settings: Settings) -> Result<()> {
    let device = build_device(settings);
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        if !device.check_installed() {
            tracing::warn!("`hdc version` failed; tools will report failures until hdc is reachable");
        }
        tracing::info!("starting harmony-bridge MCP server on stdio");
        let service = server::HarmonyServer::new(device)
            .serve(stdio())
            .await
            .context("failed to start MCP server")?;
        service.waiting().await.context("MCP server stopped with an error")?;
        Ok::<_, anyhow::Error>(())
    })
}

fn print_tools() -> Result<()> {
    let rows: Vec<Value> = server::TOOL_NAMES
        .iter()
        .map(|name| json!({ "name": name, "transport": "mcp-stdio" }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&json!({ "tools": rows }))?);
    Ok(())
}

fn elements_payload(mode: extract::ReportMode, elements: &[extract::ExtractedElement]) -> Value {
    json!({
        "captured_at": Utc::now().to_rfc3339(),
        "mode": mode,
        "element_count": elements.len(),
        "elements": elements,
    })
}

fn command_layout(settings: Settings, args: LayoutArgs) -> Result<()> {
    let mode = settings.report_mode;
    let device = build_device(settings);

    if !args.json && args.out.is_none() {
        println!("{}", device.get_ui_layout());
        return Ok(());
    }

    let elements = device.ui_layout()?;
    let payload = elements_payload(mode, &elements);
    if let Some(out) = args.out.as_deref() {
        save_payload(out, &payload)?;
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", extract::render_report(&elements));
    }
    Ok(())
}

fn command_parse(settings: Settings, args: ParseArgs) -> Result<()> {
    let root = hierarchy::parse_snapshot_file(&args.file)?;
    let elements = extract::extract(&root, settings.report_mode);
    if args.json {
        let payload = elements_payload(settings.report_mode, &elements);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", extract::render_report(&elements));
    }
    Ok(())
}

fn command_resolve(text: &str) -> Result<()> {
    let point = coords::resolve_coordinate_text(text)?;
    println!("{}", serde_json::to_string(&point)?);
    Ok(())
}

fn command_doctor(settings: Settings) -> Result<()> {
    let bridge = runner::HdcBridge::from_settings(&settings);
    let outcome = runtime_check(&bridge);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome["ok"].as_bool() == Some(true) {
        Ok(())
    } else {
        anyhow::bail!("hdc is not usable with the current settings")
    }
}

fn runtime_check(bridge: &runner::HdcBridge) -> Value {
    use runner::DeviceBridge;
    let version = bridge.run(&["version"]);
    let targets = if version.ok {
        Some(bridge.run(&["list", "targets"]))
    } else {
        None
    };
    json!({
        "ok": version.ok,
        "hdc": bridge.program(),
        "version": version.output.trim(),
        "targets": targets.map(|t| t.output.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect::<Vec<_>>()),
    })
}

/// Persist a layout payload at `path`, creating missing directories.
fn save_payload(path: &Path, payload: &Value) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }
    let mut text = serde_json::to_string_pretty(payload)?;
    text.push('\n');
    fs::write(path, text).with_context(|| format!("cannot write layout payload to {}", path.display()))
}
