use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use hook_kernel_core::{
    activate, cascade, default_tie_breakers, execute, learn_delta, prioritize, rollback,
    Condition, Context, Hook, Operation, OperationRegistry, OutcomePlan, Policy,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod demo;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "HK_LOG";

#[derive(Debug, Parser)]
#[command(name = "hk")]
#[command(about = "Knowledge-hook algebra CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Normalize a condition tree and report its canonical key.
    Normalize(NormalizeArgs),
    /// List hooks whose condition holds and the one that would be selected.
    Activate(SelectArgs),
    /// Execute the selected (or named) hook against a context.
    Execute(ExecuteArgs),
    /// Undo an outcome plan against a context.
    Rollback(RollbackArgs),
    /// Run activation and execution repeatedly under the policy bounds.
    Cascade(SelectArgs),
    /// Learn a hook from a before/after context pair.
    Learn(LearnArgs),
    /// Run the built-in battery-saver scenario end to end.
    Demo,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    #[arg(long)]
    condition: PathBuf,
}

#[derive(Debug, Args)]
struct PolicyArgs {
    /// Policy document, YAML or JSON.
    #[arg(long)]
    policy: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SelectArgs {
    #[arg(long)]
    hooks: PathBuf,
    #[arg(long)]
    context: PathBuf,
    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Debug, Args)]
struct ExecuteArgs {
    #[command(flatten)]
    select: SelectArgs,
    #[arg(long)]
    hook_id: Option<String>,
}

#[derive(Debug, Args)]
struct RollbackArgs {
    #[arg(long)]
    plan: PathBuf,
    #[arg(long)]
    context: PathBuf,
}

#[derive(Debug, Args)]
struct LearnArgs {
    #[arg(long)]
    before: PathBuf,
    #[arg(long)]
    after: PathBuf,
    #[arg(long)]
    actions: Option<PathBuf>,
    #[command(flatten)]
    policy: PolicyArgs,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let registry = OperationRegistry::standard();
    match cli.command {
        Command::Normalize(args) => run_normalize(&args),
        Command::Activate(args) => run_activate(&args),
        Command::Execute(args) => run_execute(&args, &registry),
        Command::Rollback(args) => run_rollback(&args, &registry),
        Command::Cascade(args) => run_cascade(&args, &registry),
        Command::Learn(args) => run_learn(&args, &registry),
        Command::Demo => emit_json(demo::run(&registry)?),
    }
}

fn run_normalize(args: &NormalizeArgs) -> Result<()> {
    let body = read_file(&args.condition, "condition")?;
    let condition = Condition::from_json(&body)
        .with_context(|| format!("invalid condition in {}", args.condition.display()))?;
    emit_json(serde_json::json!({
        "canonical_key": condition.canonical_key(),
        "specificity": condition.specificity(),
        "condition": condition.normalize(),
    }))
}

fn run_activate(args: &SelectArgs) -> Result<()> {
    let hooks = load_hooks(&args.hooks)?;
    let context: Context = read_json(&args.context, "context")?;
    let policy = load_policy(args.policy.policy.as_deref())?;

    let activated = activate(&hooks, &context);
    let selected = prioritize(&activated, &policy);
    emit_json(serde_json::json!({
        "activated": activated.iter().map(|hook| hook.metadata.id.as_str()).collect::<Vec<_>>(),
        "selected": selected.map(|hook| hook.metadata.id.as_str()),
        "min_success_score": policy.selection.min_success_score,
        "tie_breakers": default_tie_breakers(),
    }))
}

fn run_execute(args: &ExecuteArgs, registry: &OperationRegistry) -> Result<()> {
    let hooks = load_hooks(&args.select.hooks)?;
    let context: Context = read_json(&args.select.context, "context")?;
    let policy = load_policy(args.select.policy.policy.as_deref())?;

    let hook = match args.hook_id.as_deref() {
        Some(hook_id) => hooks
            .iter()
            .find(|hook| hook.metadata.id.as_str() == hook_id)
            .ok_or_else(|| anyhow!("hook not found: {hook_id}"))?,
        None => prioritize(&activate(&hooks, &context), &policy)
            .ok_or_else(|| anyhow!("no hook activated for the given context"))?,
    };

    let execution = execute(hook, &context, registry)
        .with_context(|| format!("failed to execute hook {}", hook.metadata.id))?;
    emit_json(serde_json::json!({
        "hook_id": hook.metadata.id,
        "context": execution.context,
        "plan": execution.plan,
    }))
}

fn run_rollback(args: &RollbackArgs, registry: &OperationRegistry) -> Result<()> {
    let plan: OutcomePlan = read_json(&args.plan, "plan")?;
    let context: Context = read_json(&args.context, "context")?;
    let restored = rollback(&plan, &context, registry).context("failed to roll back plan")?;
    emit_json(serde_json::json!({ "context": restored }))
}

fn run_cascade(args: &SelectArgs, registry: &OperationRegistry) -> Result<()> {
    let hooks = load_hooks(&args.hooks)?;
    let context: Context = read_json(&args.context, "context")?;
    let policy = load_policy(args.policy.policy.as_deref())?;

    let trace = cascade(hooks.as_slice(), &context, &policy, registry).context("cascade failed")?;
    emit_json(serde_json::to_value(&trace).context("failed to serialize cascade trace")?)
}

fn run_learn(args: &LearnArgs, registry: &OperationRegistry) -> Result<()> {
    let before: Context = read_json(&args.before, "context")?;
    let after: Context = read_json(&args.after, "context")?;
    let actions: Vec<Operation> = match args.actions.as_deref() {
        Some(path) => read_json(path, "actions")?,
        None => Vec::new(),
    };
    let policy = load_policy(args.policy.policy.as_deref())?;

    let hook = learn_delta(&before, &after, &actions, &policy, registry)
        .context("failed to learn hook from delta")?;
    emit_json(serde_json::json!({ "hook": hook }))
}

fn read_file(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {what} file {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let body = read_file(path, what)?;
    serde_json::from_str(&body)
        .with_context(|| format!("failed to parse {what} file {}", path.display()))
}

/// Hooks from a JSON array; specificity is recomputed so hand-written files
/// may omit it.
fn load_hooks(path: &Path) -> Result<Vec<Hook>> {
    let hooks: Vec<Hook> = read_json(path, "hooks")?;
    hooks
        .into_iter()
        .map(|hook| -> Result<Hook> {
            let hook = hook.with_recomputed_specificity();
            hook.validate()
                .with_context(|| format!("invalid hook {} in {}", hook.metadata.id, path.display()))?;
            Ok(hook)
        })
        .collect()
}

fn load_policy(path: Option<&Path>) -> Result<Policy> {
    let Some(path) = path else {
        return Ok(Policy::default());
    };

    let body = read_file(path, "policy")?;
    let is_json = path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let policy: Policy = if is_json {
        serde_json::from_str(&body)
            .with_context(|| format!("failed to parse policy JSON {}", path.display()))?
    } else {
        serde_yaml::from_str(&body)
            .with_context(|| format!("failed to parse policy YAML {}", path.display()))?
    };
    policy.validate().with_context(|| format!("invalid policy {}", path.display()))?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_version_wraps_non_objects() {
        let wrapped = with_contract_version(serde_json::json!([1, 2]));
        assert_eq!(wrapped["contract_version"], CLI_CONTRACT_VERSION);
        assert_eq!(wrapped["payload"], serde_json::json!([1, 2]));

        let object = with_contract_version(serde_json::json!({"selected": null}));
        assert_eq!(object["contract_version"], CLI_CONTRACT_VERSION);
        assert!(object["selected"].is_null());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
