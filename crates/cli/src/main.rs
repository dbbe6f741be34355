use std::{path::Path, process::ExitCode, sync::Arc};

use actionflow_engine::{
    ActionExecutor, EngineConfig, InMemoryStateStore, composite, parse_action_file, parse_context_file,
    templates::collect_template_expressions,
};
use actionflow_types::{ActionDescription, ActionList, ExecutionContext, Guard, StateStore};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{Value, json};
use tracing::{info, warn};

mod handlers;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_actions(sub).await,
        Some(("validate", sub)) => validate_actions(sub),
        _ => {
            build_cli().print_help()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let action_arg = Arg::new("action")
        .long("action")
        .short('a')
        .action(ArgAction::Set)
        .required(true)
        .help("Path to an action description (YAML/JSON)");

    Command::new("actionflow")
        .about("Execute declarative UI actions")
        .subcommand(
            Command::new("run")
                .about("Execute the actions in a file and print their results")
                .arg(action_arg.clone())
                .arg(
                    Arg::new("context")
                        .long("context")
                        .short('c')
                        .action(ArgAction::Set)
                        .help("Path to an execution context (YAML/JSON)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .action(ArgAction::Set)
                        .help("Path to an engine config file; defaults to the user config location"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Check that every action type is registered and list template references")
                .arg(action_arg),
        )
}

async fn run_actions(matches: &ArgMatches) -> Result<ExitCode> {
    let action_path = required_path(matches, "action")?;
    let actions = parse_action_file(action_path)?;
    let config = match matches.get_one::<String>("config") {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("failed to load engine config: {path}"))?
            .with_env_overrides(),
        None => EngineConfig::load(),
    };
    let context = match matches.get_one::<String>("context") {
        Some(path) => parse_context_file(path)?,
        None => ExecutionContext::default(),
    };

    let store = Arc::new(InMemoryStateStore::new(context.page_state.clone()));
    let context = Arc::new(context.with_state(store.clone()));
    let executor = Arc::new(ActionExecutor::new(handlers::demo_registry()?).with_config(config));
    composite::install(&executor)?;

    info!(actions = actions.len(), file = %action_path.display(), "running actions");
    let run = executor.execute_sequence(actions.as_slice(), Arc::clone(&context), None);
    tokio::pin!(run);
    let results = tokio::select! {
        results = &mut run => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received; cancelling in-flight actions");
            executor.cancel_all();
            run.await
        }
    };

    let succeeded = results.iter().all(|result| result.success);
    let output = json!({
        "results": results,
        "pageState": store.snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn validate_actions(matches: &ArgMatches) -> Result<ExitCode> {
    let action_path = required_path(matches, "action")?;
    let actions = parse_action_file(action_path)?;
    let executor = Arc::new(ActionExecutor::new(handlers::demo_registry()?));
    composite::install(&executor)?;
    let registry = executor.registry();

    let mut report = Vec::new();
    visit_actions(&actions, "", &mut |path, action| {
        let mut templates = collect_template_expressions(&action.params);
        if let Some(Guard::Expression(expression)) = &action.when {
            templates.extend(collect_template_expressions(&Value::String(expression.clone())));
        }
        report.push(json!({
            "path": path,
            "type": action.action_type,
            "registered": registry.has(&action.action_type),
            "templates": templates,
        }));
    });

    let unknown = report.iter().filter(|entry| entry["registered"] == false).count();
    println!("{}", serde_json::to_string_pretty(&json!({ "actions": report, "unknownTypes": unknown }))?);
    Ok(if unknown == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Walks actions, their continuations and the nested actions of composite params.
fn visit_actions(actions: &ActionList, prefix: &str, visit: &mut dyn FnMut(&str, &ActionDescription)) {
    for (index, action) in actions.iter().enumerate() {
        let path = format!("{prefix}[{index}]");
        visit(&path, action);
        visit_actions(&action.on_success, &format!("{path}.onSuccess"), visit);
        visit_actions(&action.on_error, &format!("{path}.onError"), visit);
        for key in ["actions", "then", "else"] {
            if let Some(nested) = action.params.get(key)
                && let Ok(nested) = serde_json::from_value::<ActionList>(nested.clone())
            {
                visit_actions(&nested, &format!("{path}.params.{key}"), visit);
            }
        }
    }
}

fn required_path<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a Path> {
    matches
        .get_one::<String>(name)
        .map(Path::new)
        .with_context(|| format!("missing --{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn visit_actions_reaches_nested_actions() {
        let actions: ActionList = serde_json::from_value(json!([{
            "type": "sequence",
            "params": { "actions": [{ "type": "log" }, { "type": "unknown" }] },
            "onError": { "type": "fail" }
        }]))
        .unwrap();

        let mut seen = Vec::new();
        visit_actions(&actions, "", &mut |path, action| seen.push(format!("{path}:{}", action.action_type)));

        assert_eq!(
            seen,
            vec![
                "[0]:sequence".to_string(),
                "[0].onError[0]:fail".to_string(),
                "[0].params.actions[0]:log".to_string(),
                "[0].params.actions[1]:unknown".to_string(),
            ]
        );
    }
}
