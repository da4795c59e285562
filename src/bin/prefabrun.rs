//! prefabrun - Prefab Function Gateway CLI
//!
//! Runs prefab functions inside request workspaces and manages the
//! workspace root.
//!
//! ## Usage
//!
//! ```sh
//! prefabrun invoke <function> [--param k=v]... [--file param=path]...
//! prefabrun manifest
//! prefabrun workspaces
//! prefabrun teardown <request-id>
//! prefabrun sweep [--max-age secs]
//! prefabrun artifacts
//! prefabrun gc [--keep digest]...
//! ```
//!
//! Logs go to stderr; set `PREFABRUN_DEBUG=1` for debug output.

use prefabrun::{
    ArtifactStore, FfmpegBackend, FunctionRegistry, Gateway, GatewayConfig, InvocationRequest,
    StagingSource, WorkspaceManager, media_registry,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Name reported in the generated manifest.
const MANIFEST_NAME: &str = "prefabrun-media";

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Invoke {
        function: String,
        params: Vec<(String, Value)>,
        files: Vec<(String, PathBuf)>,
        request_id: Option<String>,
        config: Option<PathBuf>,
    },
    Manifest,
    Workspaces {
        config: Option<PathBuf>,
    },
    Teardown {
        request_id: String,
        config: Option<PathBuf>,
    },
    Sweep {
        max_age: Option<u64>,
        config: Option<PathBuf>,
    },
    Artifacts {
        config: Option<PathBuf>,
    },
    Gc {
        keep: Vec<String>,
        config: Option<PathBuf>,
    },
    Version,
    Help,
}

/// Splits `key=value`.
fn split_pair(flag: &str, raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("{} expects key=value, got '{}'", flag, raw)),
    }
}

/// Parses a parameter value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    let mut positional = Vec::new();
    let mut params = Vec::new();
    let mut files = Vec::new();
    let mut request_id = None;
    let mut config = None;
    let mut max_age = None;
    let mut keep = Vec::new();

    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        let takes_value = matches!(
            flag,
            "--param"
                | "-p"
                | "--file"
                | "-f"
                | "--request-id"
                | "--config"
                | "-c"
                | "--max-age"
                | "--keep"
        );
        if !takes_value {
            positional.push(args[i].clone());
            i += 1;
            continue;
        }
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("{} requires a value", flag))?;
        match flag {
            "--param" | "-p" => {
                let (k, v) = split_pair(flag, value)?;
                params.push((k, parse_value(&v)));
            }
            "--file" | "-f" => {
                let (k, v) = split_pair(flag, value)?;
                files.push((k, PathBuf::from(v)));
            }
            "--request-id" => request_id = Some(value.clone()),
            "--config" | "-c" => config = Some(PathBuf::from(value)),
            "--keep" => keep.push(value.clone()),
            _ => {
                max_age = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("--max-age expects seconds, got '{}'", value))?,
                );
            }
        }
        i += 2;
    }

    match args[1].as_str() {
        "invoke" => {
            let function = positional
                .first()
                .cloned()
                .ok_or_else(|| "invoke requires <function>".to_string())?;
            Ok(Command::Invoke {
                function,
                params,
                files,
                request_id,
                config,
            })
        }
        "manifest" => Ok(Command::Manifest),
        "workspaces" | "ls" => Ok(Command::Workspaces { config }),
        "teardown" => {
            let request_id = positional
                .first()
                .cloned()
                .ok_or_else(|| "teardown requires <request-id>".to_string())?;
            Ok(Command::Teardown { request_id, config })
        }
        "sweep" => Ok(Command::Sweep { max_age, config }),
        "artifacts" => Ok(Command::Artifacts { config }),
        "gc" => Ok(Command::Gc { keep, config }),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {}", unknown)),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<GatewayConfig, String> {
    match path {
        Some(p) => GatewayConfig::load(p).map_err(|e| e.to_string()),
        None => Ok(GatewayConfig::default()),
    }
}

fn build_registry(config: &GatewayConfig) -> Result<FunctionRegistry, String> {
    let backend = Arc::new(FfmpegBackend::from_config(config));
    media_registry(backend).map_err(|e| e.to_string())
}

async fn cmd_invoke(
    function: String,
    params: Vec<(String, Value)>,
    files: Vec<(String, PathBuf)>,
    request_id: Option<String>,
    config: Option<PathBuf>,
) -> Result<(), String> {
    let config = load_config(config.as_ref())?;
    let registry = build_registry(&config)?;
    let gateway = Gateway::from_config(&config, registry).map_err(|e| e.to_string())?;

    let mut request = InvocationRequest::new(function);
    if let Some(id) = request_id {
        request = request.with_request_id(id);
    }
    for (name, value) in params {
        request = request.with_param(name, value);
    }
    for (param, path) in files {
        request = request.with_input(param, StagingSource::Path(path));
    }

    let response = gateway.invoke(request).await.map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn cmd_manifest() -> Result<(), String> {
    let registry = build_registry(&GatewayConfig::default())?;
    let manifest = registry.manifest(MANIFEST_NAME, env!("CARGO_PKG_VERSION"));
    let json = manifest.to_json_pretty().map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn open_workspaces(config: Option<&PathBuf>) -> Result<(GatewayConfig, WorkspaceManager), String> {
    let config = load_config(config)?;
    let manager =
        WorkspaceManager::with_path(config.workspace_root.clone()).map_err(|e| e.to_string())?;
    Ok((config, manager))
}

fn cmd_workspaces(config: Option<PathBuf>) -> Result<(), String> {
    let (_, manager) = open_workspaces(config.as_ref())?;
    let ids = manager.list_workspaces().map_err(|e| e.to_string())?;

    println!("REQUEST\tPATH");
    for id in ids {
        println!("{}\t{}", id, manager.root().join(&id).display());
    }
    Ok(())
}

fn cmd_teardown(request_id: String, config: Option<PathBuf>) -> Result<(), String> {
    let (_, manager) = open_workspaces(config.as_ref())?;
    manager.teardown(&request_id).map_err(|e| e.to_string())?;
    eprintln!("Removed workspace {}", request_id);
    Ok(())
}

fn cmd_sweep(max_age: Option<u64>, config: Option<PathBuf>) -> Result<(), String> {
    let (config, manager) = open_workspaces(config.as_ref())?;
    let max_age = max_age.map_or_else(|| config.stale_workspace_age(), Duration::from_secs);
    let stats = manager.sweep_stale(max_age).map_err(|e| e.to_string())?;
    eprintln!(
        "Removed {} stale workspaces ({} bytes)",
        stats.removed_count, stats.freed_bytes
    );
    Ok(())
}

fn open_artifacts(config: Option<&PathBuf>) -> Result<ArtifactStore, String> {
    let config = load_config(config)?;
    ArtifactStore::with_path(config.artifact_root).map_err(|e| e.to_string())
}

fn cmd_artifacts(config: Option<PathBuf>) -> Result<(), String> {
    let store = open_artifacts(config.as_ref())?;
    let digests = store.list_artifacts().map_err(|e| e.to_string())?;
    let total = store.total_size().map_err(|e| e.to_string())?;

    println!("DIGEST");
    for digest in &digests {
        println!("{}", digest);
    }
    eprintln!("{} artifacts, {} bytes", digests.len(), total);
    Ok(())
}

fn cmd_gc(keep: Vec<String>, config: Option<PathBuf>) -> Result<(), String> {
    let store = open_artifacts(config.as_ref())?;
    let stats = store.gc(&keep).map_err(|e| e.to_string())?;
    eprintln!(
        "Removed {} artifacts ({} bytes)",
        stats.removed_count, stats.freed_bytes
    );
    Ok(())
}

fn cmd_version() {
    println!("prefabrun version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"prefabrun - request workspaces for prefab functions

USAGE:
    prefabrun <command> [options]

COMMANDS:
    invoke <function>        Run a function in a fresh workspace (JSON result)
    manifest                 Print the function manifest (JSON)
    workspaces               List live request workspaces
    teardown <request-id>    Remove a request workspace
    sweep                    Remove stale workspaces
    artifacts                List collected artifacts and their total size
    gc                       Remove collected artifacts not named by --keep
    version                  Show version info
    help                     Show this help

OPTIONS:
    --param, -p <k=v>        Function parameter (JSON value or string)
    --file, -f <param=path>  Stage a file for an InputFile parameter
    --request-id <id>        Use a fixed request id
    --config, -c <path>      Gateway configuration (JSON)
    --max-age <secs>         Sweep age threshold
    --keep <digest>          Artifact to keep during gc (repeatable)

EXAMPLES:
    prefabrun invoke get_video_info --file video_path=clip.mp4
    prefabrun invoke trim_video --file video_path=clip.mp4 -p start_time=5 -p end_time=10
    prefabrun invoke concatenate_videos --file video_paths=a.mp4 --file video_paths=b.mp4
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn init_tracing() {
    let level = match std::env::var("PREFABRUN_DEBUG") {
        Ok(v) if v == "1" => Level::DEBUG,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match parse_args() {
        Ok(cmd) => {
            let result = match cmd {
                Command::Invoke {
                    function,
                    params,
                    files,
                    request_id,
                    config,
                } => cmd_invoke(function, params, files, request_id, config).await,
                Command::Manifest => cmd_manifest(),
                Command::Workspaces { config } => cmd_workspaces(config),
                Command::Teardown { request_id, config } => cmd_teardown(request_id, config),
                Command::Sweep { max_age, config } => cmd_sweep(max_age, config),
                Command::Artifacts { config } => cmd_artifacts(config),
                Command::Gc { keep, config } => cmd_gc(keep, config),
                Command::Version => {
                    cmd_version();
                    Ok(())
                }
                Command::Help => {
                    cmd_help();
                    Ok(())
                }
            };

            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            ExitCode::FAILURE
        }
    }
}
