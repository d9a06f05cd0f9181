//! CLI subcommands — init, validate, synth, plan, graph, userdata, drift, status, schema, completion.

use crate::core::{planner, props, resolver, stack, state, synth, types, validate};
use crate::tripwire::{drift, eventlog, hasher};
use base64::Engine as _;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "stackforge",
    version,
    about = "Rust-native stack definition — typed resource graph, CloudFormation synthesis, BLAKE3 state"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs shared by every command that builds the stack.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Stack properties file (defaults apply when absent)
    #[arg(long, global = true, default_value = "stack.yaml")]
    pub props: PathBuf,

    /// Environment file loaded before construction (optional)
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    /// Target account id
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Target region
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Stack tag, repeatable
    #[arg(long = "tag", global = true, value_name = "KEY=VALUE")]
    pub tags: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter stack.yaml and state directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Build and validate the stack without writing anything
    Validate,

    /// Synthesize the CloudFormation template and record state
    Synth {
        /// Output directory for templates
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,

        /// Template encoding
        #[arg(long, value_enum, default_value_t = types::TemplateFormat::Json)]
        format: types::TemplateFormat,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Show what a synth would change relative to the lock
    Plan {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Print resources in dependency order
    Graph,

    /// Print each instance's boot script
    Userdata {
        /// Emit base64, as the instance receives it
        #[arg(long)]
        base64: bool,
    },

    /// Detect hand edits of synthesized templates (tripwire)
    Drift {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        stack: Option<String>,

        /// Exit non-zero on any drift (for CI/cron)
        #[arg(long)]
        tripwire: bool,
    },

    /// Show recorded state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print the JSON schema of stack.yaml
    Schema,

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cli: Cli) -> Result<(), String> {
    let global = cli.global;
    match cli.command {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate => cmd_validate(&global),
        Commands::Synth {
            out,
            format,
            state_dir,
        } => cmd_synth(&global, &out, format, &state_dir),
        Commands::Plan { state_dir } => cmd_plan(&global, &state_dir),
        Commands::Graph => cmd_graph(&global),
        Commands::Userdata { base64 } => cmd_userdata(&global, base64),
        Commands::Drift {
            state_dir,
            stack,
            tripwire,
        } => cmd_drift(&state_dir, stack.as_deref(), tripwire),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Schema => cmd_schema(),
        Commands::Completion { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stackforge", &mut std::io::stdout());
            Ok(())
        }
    }
}

const STARTER_PROPS: &str = r#"# Stack properties for stackforge
stack_name: StreamlitAppStack
description: "Streamlit app on a single EC2 instance"

env: {}
#  account: "123456789012"
#  region: ap-northeast-1

tags: {}
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let props_path = path.join("stack.yaml");
    if props_path.exists() {
        return Err(format!("{} already exists", props_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;
    std::fs::write(&props_path, STARTER_PROPS)
        .map_err(|e| format!("cannot write {}: {}", props_path.display(), e))?;

    println!("Initialized stackforge project at {}", path.display());
    println!("  Created: {}", props_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Load props, apply overrides, declare the stack. Does not validate.
fn build_stack(global: &GlobalArgs) -> Result<types::Stack, String> {
    let loaded = props::load_props(&global.props)?;
    let overrides = props::PropsOverrides {
        account: global.account.clone(),
        region: global.region.clone(),
        tags: global.tags.clone(),
    };
    let stack_props = props::apply_overrides(loaded, &overrides)?;
    Ok(stack::define_stack(stack_props, Some(&global.env_file)))
}

/// Build and validate, printing every error.
fn build_and_validate(global: &GlobalArgs) -> Result<types::Stack, String> {
    let stack = build_stack(global)?;
    let errors = validate::validate_stack(&stack);
    if errors.is_empty() {
        return Ok(stack);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_validate(global: &GlobalArgs) -> Result<(), String> {
    let stack = build_and_validate(global)?;
    let ingress: usize = stack.security_groups().map(|sg| sg.ingress.len()).sum();
    println!(
        "OK: {} ({} resources, {} ingress rules, {} instances)",
        stack.props.stack_name,
        stack.resources.len(),
        ingress,
        stack.instances().count()
    );
    Ok(())
}

/// Template file path for a stack.
fn template_path(out: &Path, stack_name: &str, format: types::TemplateFormat) -> PathBuf {
    out.join(format!("{}.template.{}", stack_name, format.extension()))
}

fn cmd_synth(
    global: &GlobalArgs,
    out: &Path,
    format: types::TemplateFormat,
    state_dir: &Path,
) -> Result<(), String> {
    let started = Instant::now();
    let stack = build_and_validate(global)?;
    let name = stack.props.stack_name.clone();
    let run_id = eventlog::generate_run_id();

    eventlog::append_event(
        state_dir,
        &name,
        types::ProvenanceEvent::SynthStarted {
            stack: name.clone(),
            run_id: run_id.clone(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )?;

    let template = synth::synthesize(&stack)?;
    let rendered = synth::render(&template, format)?;

    std::fs::create_dir_all(out)
        .map_err(|e| format!("cannot create {}: {}", out.display(), e))?;
    let path = template_path(out, &name, format);
    std::fs::write(&path, &rendered)
        .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
    let template_hash = hasher::hash_file(&path)?;

    let resources = synth::resource_hashes(&template)?;
    for (logical_id, entry) in &resources {
        eventlog::append_event(
            state_dir,
            &name,
            types::ProvenanceEvent::ResourceSynthesized {
                stack: name.clone(),
                logical_id: logical_id.clone(),
                resource_type: entry.resource_type.clone(),
                hash: entry.hash.clone(),
            },
        )?;
    }

    let count = resources.len();
    let lock = state::new_lock(
        &name,
        Some(types::TemplateRecord {
            path: path.to_string_lossy().to_string(),
            format,
            hash: template_hash.clone(),
        }),
        resources,
    );
    state::save_lock(state_dir, &lock)?;

    eventlog::append_event(
        state_dir,
        &name,
        types::ProvenanceEvent::SynthCompleted {
            stack: name.clone(),
            run_id,
            resources: u32::try_from(count).unwrap_or(u32::MAX),
            template_hash,
            total_seconds: started.elapsed().as_secs_f64(),
        },
    )?;

    println!("Synthesized {} ({} resources)", name, count);
    println!("  Template: {}", path.display());
    println!("  Lock:     {}", state::lock_file_path(state_dir, &name).display());
    Ok(())
}

fn cmd_plan(global: &GlobalArgs, state_dir: &Path) -> Result<(), String> {
    let stack = build_and_validate(global)?;
    let name = &stack.props.stack_name;
    let template = synth::synthesize(&stack)?;
    let lock = state::load_lock(state_dir, name)?;
    let plan = planner::plan(name, &template, lock.as_ref())?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.stack, plan.changes.len());
    println!();
    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_graph(global: &GlobalArgs) -> Result<(), String> {
    let stack = build_stack(global)?;
    let ordered = resolver::ordered_resources(&stack)?;
    println!("{} ({} resources)", stack.props.stack_name, ordered.len());
    for (i, resource) in ordered.iter().enumerate() {
        let refs = resource.references();
        if refs.is_empty() {
            println!("  {}. {} ({})", i + 1, resource.id(), resource.kind());
        } else {
            println!(
                "  {}. {} ({}) <- {}",
                i + 1,
                resource.id(),
                resource.kind(),
                refs.join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_userdata(global: &GlobalArgs, encode: bool) -> Result<(), String> {
    let stack = build_stack(global)?;
    let mut found = false;
    for instance in stack.instances() {
        let Some(ref user_data) = instance.user_data else {
            continue;
        };
        found = true;
        let script = user_data.render();
        if encode {
            println!(
                "{}: {}",
                instance.id,
                base64::engine::general_purpose::STANDARD.encode(script.as_bytes())
            );
        } else {
            println!("# {} ({})", instance.id, instance.instance_name);
            println!("{}", script);
        }
    }
    if !found {
        println!("No instance declares a boot script.");
    }
    Ok(())
}

/// Stacks under `state_dir`, optionally narrowed to one.
fn selected_stacks(state_dir: &Path, filter: Option<&str>) -> Result<Vec<String>, String> {
    Ok(state::list_stacks(state_dir)?
        .into_iter()
        .filter(|s| filter.is_none_or(|f| f == s))
        .collect())
}

fn cmd_drift(state_dir: &Path, stack_filter: Option<&str>, tripwire_mode: bool) -> Result<(), String> {
    let mut total_drift = 0;

    for name in selected_stacks(state_dir, stack_filter)? {
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        println!("Checking {}...", name);
        let findings = drift::detect_drift(&lock);
        if findings.is_empty() {
            println!("  No drift detected.");
            continue;
        }
        for f in &findings {
            println!("  DRIFTED: {} ({})", f.path, f.detail);
            println!("    Expected: {}", f.expected_hash);
            println!("    Actual:   {}", f.actual_hash);
            eventlog::append_event(
                state_dir,
                &name,
                types::ProvenanceEvent::DriftDetected {
                    stack: f.stack.clone(),
                    path: f.path.clone(),
                    expected_hash: f.expected_hash.clone(),
                    actual_hash: f.actual_hash.clone(),
                },
            )?;
        }
        total_drift += findings.len();
    }

    if total_drift > 0 {
        println!();
        println!("Drift detected: {} template(s)", total_drift);
        if tripwire_mode {
            return Err(format!("{} drift finding(s)", total_drift));
        }
    } else {
        println!("No drift detected.");
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let stacks = selected_stacks(state_dir, stack_filter)?;
    if stacks.is_empty() {
        println!("No state found in {}", state_dir.display());
        return Ok(());
    }

    for name in stacks {
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        println!(
            "{} ({} resources, generated {} by {})",
            lock.stack,
            lock.resources.len(),
            lock.generated_at,
            lock.generator
        );
        if let Some(ref t) = lock.template {
            println!("  template: {} [{}]", t.path, t.hash);
        }
        for (logical_id, rl) in &lock.resources {
            println!("  {:<48} {:<38} {}", logical_id, rl.resource_type, rl.hash);
        }
    }
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    println!("{}", props::props_schema()?);
    Ok(())
}
