use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crew_core::snapshot::normalize_repo_identity;
use crew_core::{Session, TaskState};
use crew_runner::config::default_config_path;
use crew_runner::{CrewConfig, Dispatcher, ProfileSet, SessionStore};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crew", version, about = "Parallel agent dispatch into isolated containers")]
struct Cli {
    /// Config file (defaults to $CREW_CONFIG or ~/.config/crew/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the decomposition prompt for a goal
    Prompt {
        goal: String,
        #[arg(long)]
        json: bool,
    },
    /// Parse a plan file and show its execution waves
    Plan {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the snapshot image name for a repository
    Snapshot {
        repo: String,
        #[arg(long, default_value = "latest")]
        tag: String,
        #[arg(long)]
        json: bool,
    },
    /// Dispatch a plan against a profile
    Run {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        plan: PathBuf,
        /// Leave environments running after items finish
        #[arg(long)]
        keep: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show a session (latest when no id is given)
    Status {
        id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List session ids, most recent first
    List {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = load_config(cli.config.as_deref()).and_then(|cfg| {
        init_tracing(&cfg, cli.verbose);
        run_command(cli.command, &cfg, cli.config.as_deref())
    });
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            if payload.get("ok") == Some(&Value::Bool(false)) {
                std::process::exit(1);
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CrewConfig> {
    CrewConfig::load(path).context("loading configuration")
}

fn init_tracing(cfg: &CrewConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_command(
    command: Commands,
    cfg: &CrewConfig,
    config_path: Option<&Path>,
) -> Result<Option<Value>> {
    match command {
        Commands::Prompt { goal, json } => {
            let (prompt, schema) = crew_core::build_decomposition_prompt(&goal);
            if json {
                let schema: Value = serde_json::from_str(&schema).unwrap_or(Value::String(schema));
                return Ok(Some(json!({
                    "ok": true,
                    "command": "prompt",
                    "prompt": prompt,
                    "schema": schema
                })));
            }
            println!("{}", prompt);
        }
        Commands::Plan { file, json } => {
            let plan = read_plan(&file)?;
            let waves = crew_core::execution_waves(&plan.work_items);
            let dangling = plan.dangling_dependencies();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plan",
                    "goal": plan.goal,
                    "items": plan.work_items.len(),
                    "waves": waves
                        .iter()
                        .map(|w| w.iter().map(|i| i.id).collect::<Vec<_>>())
                        .collect::<Vec<_>>(),
                    "dangling_dependencies": dangling
                        .iter()
                        .map(|(item, dep)| json!({"item": item, "dependency": dep}))
                        .collect::<Vec<_>>()
                })));
            }
            println!("goal: {}", plan.goal);
            println!("items: {}", plan.work_items.len());
            for (index, wave) in waves.iter().enumerate() {
                let line: Vec<String> = wave
                    .iter()
                    .map(|i| format!("{} ({})", i.id, i.title))
                    .collect();
                println!("wave {}: {}", index, line.join(", "));
            }
            for (item, dep) in dangling {
                println!("warning: item {} depends on unknown item {}", item, dep);
            }
        }
        Commands::Snapshot { repo, tag, json } => {
            let name = crew_core::snapshot_name_with_tag(&repo, &tag);
            let identity = normalize_repo_identity(&repo);
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "snapshot",
                    "repo": repo,
                    "identity": identity,
                    "image": name
                })));
            }
            println!("identity: {}", identity);
            println!("image: {}", name);
        }
        Commands::Run {
            profile,
            plan,
            keep,
            json,
        } => {
            let plan = read_plan(&plan)?;
            let profiles = load_profiles(config_path)?;
            let profile = profiles.get(&profile)?.clone();
            tracing::debug!(profile = %profile.name, repo = %profile.repo, "profile resolved");
            let runtime = crew_runtime::detect_runtime(&cfg.runtime.preferred)?;
            let dispatcher = Dispatcher::from_config(cfg, Arc::from(runtime))
                .keep_environments(keep || cfg.dispatch.keep_environments);
            let session = dispatcher.run(&profile, plan)?;
            let ok = session.status == crew_core::SessionStatus::Succeeded;
            if json {
                return Ok(Some(json!({
                    "ok": ok,
                    "command": "run",
                    "session": session_to_json(&session)
                })));
            }
            print_session(&session);
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Status { id, json } => {
            let store = SessionStore::new(&cfg.sessions.base_dir);
            let session = match id {
                Some(id) => store.load(&id)?,
                None => store.latest()?.ok_or_else(|| {
                    anyhow::anyhow!("no sessions under {}", store.base_dir().display())
                })?,
            };
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "session": session_to_json(&session)
                })));
            }
            print_session(&session);
        }
        Commands::List { json } => {
            let store = SessionStore::new(&cfg.sessions.base_dir);
            let ids = store.list()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "list",
                    "sessions": ids
                })));
            }
            for id in ids {
                println!("{}", id);
            }
        }
    }
    Ok(None)
}

fn read_plan(path: &Path) -> Result<crew_core::Plan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan {}", path.display()))?;
    Ok(crew_core::parse_plan(&raw)?)
}

fn load_profiles(config_path: Option<&Path>) -> Result<ProfileSet> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    let dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(ProfileSet::load(&ProfileSet::path_in(&dir))?)
}

fn session_to_json(session: &Session) -> Value {
    let mut value =
        serde_json::to_value(session).unwrap_or_else(|_| json!({ "id": session.id }));
    let summary = serde_json::to_value(session.summary());
    if let (Some(obj), Ok(summary)) = (value.as_object_mut(), summary) {
        obj.insert("summary".to_string(), summary);
    }
    value
}

fn print_session(session: &Session) {
    let summary = session.summary();
    println!("session_id: {}", session.id);
    println!("profile: {}", session.profile);
    println!("goal: {}", session.goal);
    println!("status: {}", session.status);
    println!("created_at: {}", session.created_at.to_rfc3339());
    if let Some(done) = session.completed_at {
        println!("completed_at: {}", done.to_rfc3339());
    }
    println!(
        "tasks: succeeded={} failed={} cancelled={} running={} queued={}",
        summary.succeeded, summary.failed, summary.cancelled, summary.running, summary.queued
    );
    for task in &session.tasks {
        let mut line = format!("  [{}] {} {}", task.id(), task.status, task.work_item.title);
        if let Some(code) = task.exit_code {
            line.push_str(&format!(" exit={}", code));
        }
        if task.status != TaskState::Succeeded {
            if let Some(err) = &task.error {
                line.push_str(&format!(" ({})", err));
            }
        }
        println!("{}", line);
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Prompt { json, .. }
        | Commands::Plan { json, .. }
        | Commands::Snapshot { json, .. }
        | Commands::Run { json, .. }
        | Commands::Status { json, .. }
        | Commands::List { json } => *json,
    }
}
