use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use indexmap::IndexMap;
use jobline_engine::{BuiltinRunner, EngineConfig, FileDefinitionLoader, JobElement, execute_fire_and_forget};
use jobline_types::RunRequest;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let matches = build_cli().get_matches();
    let config = EngineConfig::load();

    match matches.subcommand() {
        Some(("run", sub)) => run_job(&config, sub).await,
        Some(("outputs", sub)) => {
            let element = load_element(&config, sub)?;
            for name in element.list_valid_output_names() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("trigger", sub)) => {
            let file = file_arg(sub)?;
            let context = config.context_parameters();
            tokio::task::spawn_blocking(move || {
                execute_fire_and_forget(&file, &FileDefinitionLoader, Arc::new(BuiltinRunner), context.as_ref())
            })
            .await?;
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!("expected a subcommand; see --help"),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let file = Arg::new("file")
        .long("file")
        .short('f')
        .required(true)
        .action(ArgAction::Set)
        .help("Path to workflow YAML/JSON");

    Command::new("jobline")
        .about("Run pre-built workflows as request/response jobs")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run a workflow and print the selected result")
                .arg(file.clone())
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .action(ArgAction::Set)
                        .help("Step whose result answers the run"),
                )
                .arg(
                    Arg::new("param")
                        .long("param")
                        .short('p')
                        .action(ArgAction::Append)
                        .value_name("KEY=VALUE")
                        .help("Parameter to inject for this run (repeatable)"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(u64))
                        .value_name("SECS")
                        .help("Cancel the run after this many seconds"),
                ),
        )
        .subcommand(
            Command::new("outputs")
                .about("List step names that may be requested as output")
                .arg(file.clone()),
        )
        .subcommand(
            Command::new("trigger")
                .about("Run a workflow and discard its result")
                .arg(file),
        )
}

fn file_arg(matches: &ArgMatches) -> Result<String> {
    matches.get_one::<String>("file").cloned().context("missing --file")
}

fn load_element(config: &EngineConfig, matches: &ArgMatches) -> Result<JobElement> {
    let file = file_arg(matches)?;
    let element = JobElement::load(file.clone(), &file, &FileDefinitionLoader)?.with_config(config);
    Ok(element)
}

async fn run_job(config: &EngineConfig, matches: &ArgMatches) -> Result<ExitCode> {
    let element = Arc::new(load_element(config, matches)?);

    let parameters = matches
        .get_many::<String>("param")
        .map(|values| parse_parameters(values.map(String::as_str)))
        .transpose()?;
    let request = RunRequest {
        parameters,
        output_step_name: matches.get_one::<String>("output").cloned(),
    };
    let deadline = matches
        .get_one::<u64>("timeout")
        .map(|secs| Duration::from_secs(*secs))
        .or_else(|| config.run_timeout());

    let cancellation = CancellationToken::new();
    let interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling run");
            interrupt.cancel();
        }
    });

    let resolved = element.process_request_async(request, cancellation, deadline).await?;
    println!("{}", serde_json::to_string_pretty(&resolved)?);

    Ok(if resolved.outcome.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn parse_parameters<'a>(values: impl Iterator<Item = &'a str>) -> Result<IndexMap<String, String>> {
    values
        .map(|value| -> Result<(String, String)> {
            let (key, value) = value
                .split_once('=')
                .with_context(|| format!("invalid parameter '{value}'; expected KEY=VALUE"))?;
            if key.trim().is_empty() {
                bail!("invalid parameter '{key}={value}'; name is empty");
            }
            Ok((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_parameters() {
        let parameters = parse_parameters(["TARGET=/srv", "QUERY=a=b", "EMPTY="].into_iter()).expect("parse");
        assert_eq!(parameters["TARGET"], "/srv");
        assert_eq!(parameters["QUERY"], "a=b");
        assert_eq!(parameters["EMPTY"], "");
    }

    #[test]
    fn rejects_malformed_parameters() {
        assert!(parse_parameters(["NOVALUE"].into_iter()).is_err());
        assert!(parse_parameters(["=value"].into_iter()).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn run_accepts_repeated_parameters() {
        let matches = build_cli()
            .try_get_matches_from(["jobline", "run", "-f", "job.yaml", "-p", "A=1", "-p", "B=2", "--timeout", "5"])
            .expect("parse args");
        let (_, sub) = matches.subcommand().expect("subcommand");
        let values: Vec<&String> = sub.get_many::<String>("param").expect("params").collect();
        assert_eq!(values, ["A=1", "B=2"]);
        assert_eq!(sub.get_one::<u64>("timeout"), Some(&5));
    }
}
