//! Caravel CLI - deployment synchronization engine
//!
//! Usage: caravel <COMMAND>
//!
//! Commands:
//!   auth          Validate and store provider credentials
//!   analyze       Report a project's deployment requirements
//!   deploy        Build and deploy a project to a hosting target
//!   troubleshoot  Map deployment errors to suggested fixes
//!   status        List providers, frameworks and past deployments
//!   forget        Remove stored credentials

mod cli;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use caravel::{
    config, ui, CancelToken, DeployOptions, DeployStatus, DeploymentRecord, Engine,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{parse_pairs, Cli, Commands};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        ui::failure(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(config::default_state_dir);
    let (engine_config, warnings) = config::load_or_default(&state_dir);
    for warning in &warnings {
        ui::warning(&format!(
            "unknown config key '{}' in {}",
            warning.key,
            warning.file.display()
        ));
    }

    let engine = Engine::open(&state_dir, engine_config)
        .with_context(|| format!("opening state directory {}", state_dir.display()))?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).context("setting Ctrl+C handler")?;
    }

    match cli.command {
        Commands::Auth { provider, field } => {
            let fields = if field.is_empty() {
                prompt_fields()?
            } else {
                parse_pairs(&field)
                    .map_err(anyhow::Error::msg)?
                    .into_iter()
                    .collect()
            };
            let result = engine.authenticate(&provider, &fields)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.ok {
                ui::success(&format!("authenticated with {provider}"));
            } else {
                anyhow::bail!("validation failed: {}", result.detail);
            }
        }

        Commands::Analyze {
            project,
            framework,
            provider,
        } => {
            let requirements = engine.analyze(&project, &framework, &provider)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&requirements)?);
            } else {
                ui::heading(&format!("{framework} project at {}", project.display()));
                ui::detail(
                    "build",
                    requirements.build_command.as_deref().unwrap_or("(none)"),
                );
                ui::detail("output", &requirements.output_directory.display().to_string());
                if !requirements.required_env.is_empty() {
                    let vars: Vec<&str> =
                        requirements.required_env.iter().map(String::as_str).collect();
                    ui::detail("env", &vars.join(", "));
                }
                for warning in &requirements.compatibility_warnings {
                    ui::warning(warning);
                }
            }
        }

        Commands::Deploy {
            project,
            framework,
            provider,
            mode,
            backup,
            clean,
            exclude,
            env,
            site_url,
        } => {
            let env: BTreeMap<String, String> = parse_pairs(&env)
                .map_err(anyhow::Error::msg)?
                .into_iter()
                .collect();
            let options = DeployOptions {
                sync_mode: mode,
                backup,
                clean_destination: clean,
                exclusions: exclude,
                env,
                site_url,
            };

            let record = engine.deploy(&project, &framework, &provider, options, &cancel)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record(&record);
            }
            if record.final_status == DeployStatus::PartialFailure {
                std::process::exit(2);
            }
        }

        Commands::Troubleshoot { query, provider } => {
            let diagnoses = engine.troubleshoot(&query, provider.as_deref())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&diagnoses)?);
            } else if diagnoses.is_empty() {
                ui::success("no known problems detected");
            } else {
                for diagnosis in &diagnoses {
                    ui::heading(&diagnosis.problem);
                    println!("  {}", diagnosis.suggested_fix);
                }
            }
        }

        Commands::Status { record } => {
            if let Some(id) = record {
                let record = engine.record(&id)?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                } else {
                    print_record(&record);
                }
            } else {
                let providers = engine.list_providers()?;
                let records = engine.list_records()?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "providers": providers,
                            "frameworks": engine.list_frameworks(),
                            "deployments": records,
                        }))?
                    );
                } else {
                    ui::heading("providers");
                    for provider in &providers {
                        println!("  {provider}");
                    }
                    ui::heading("frameworks");
                    for framework in engine.list_frameworks() {
                        println!("  {framework}");
                    }
                    ui::heading("deployments");
                    for record in records.iter().take(10) {
                        println!(
                            "  {}  {:?}  {}/{} applied",
                            record.id,
                            record.final_status,
                            record.operations_applied,
                            record.operations_planned
                        );
                    }
                }
            }
        }

        Commands::Forget { provider } => {
            if engine.forget(&provider)? {
                ui::success(&format!("removed credentials for {provider}"));
            } else {
                ui::warning(&format!("no credentials stored for {provider}"));
            }
        }
    }

    Ok(())
}

fn print_record(record: &DeploymentRecord) {
    match record.final_status {
        DeployStatus::Succeeded => ui::success(&format!("deployment {} succeeded", record.id)),
        DeployStatus::PartialFailure => {
            ui::warning(&format!("deployment {} partially failed", record.id))
        }
        DeployStatus::Failed => ui::failure(&format!("deployment {} failed", record.id)),
        DeployStatus::InProgress => ui::warning(&format!("deployment {} in progress", record.id)),
    }
    ui::detail("target", &record.target_id);
    ui::detail(
        "applied",
        &format!(
            "{}/{} ({} failed)",
            record.operations_applied, record.operations_planned, record.operations_failed
        ),
    );
    if let Some(backup) = &record.backup_reference {
        ui::detail("backup", backup);
    }
    if let Some(url) = &record.site_url {
        ui::detail("url", url);
    }
    if let Some(detail) = &record.failure_detail {
        ui::detail("cause", detail);
    }
}

/// Interactive credential entry; values are read without echo
fn prompt_fields() -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    loop {
        let key: String = dialoguer::Input::new()
            .with_prompt("field name (empty to finish)")
            .allow_empty(true)
            .interact_text()?;
        if key.trim().is_empty() {
            break;
        }
        let value = dialoguer::Password::new()
            .with_prompt(format!("value for '{}'", key.trim()))
            .interact()?;
        fields.insert(key.trim().to_string(), value);
    }
    anyhow::ensure!(!fields.is_empty(), "no credential fields entered");
    Ok(fields)
}
