use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use mend::agents::review::ReviewAgent;
use mend::agents::testgen::TestAgent;
use mend::agents::writer::WriterAgent;
use mend::apply::{FixApplier, VerifyConfig};
use mend::cli::Cli;
use mend::config::{Config, Secrets};
use mend::generate::GeminiGenerator;
use mend::github::GitHubClient;
use mend::orchestrator::{Orchestrator, write_output};
use mend::prompts::PromptEngine;
use mend::store::RecordStore;

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("mend starting");

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    info!(?config, "config loaded");

    let secrets = match Secrets::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let github = GitHubClient::new(&secrets.github_token);
    let generator = GeminiGenerator::new(secrets.gemini_api_key.clone(), config.model.clone());
    let applier = FixApplier::new(VerifyConfig {
        command: config.verify_command.clone(),
        timeout: Duration::from_secs(config.verify_timeout),
    });
    let store = secrets
        .neo4j
        .as_ref()
        .map(|n| RecordStore::new(&n.uri, &n.user, &n.password));
    if store.is_some() {
        info!("record store enabled");
    }

    let orchestrator = Orchestrator::new(
        github,
        WriterAgent::new(
            Box::new(generator.clone()),
            PromptEngine::new(config.prompt_dir.clone()),
        ),
        ReviewAgent::new(
            Box::new(generator.clone()),
            PromptEngine::new(config.prompt_dir.clone()),
        ),
        TestAgent::new(
            Box::new(generator),
            PromptEngine::new(config.prompt_dir.clone()),
        ),
        applier,
        store,
        config.clone(),
    );

    let result = orchestrator.execute(&cli.command).await;

    if let Err(e) = write_output(Path::new(&config.output), std::slice::from_ref(&result)) {
        warn!(error = %e, "failed to write run summary");
    }

    info!(
        command = %result.command,
        success = result.success,
        duration_seconds = result.duration_seconds,
        "finished"
    );

    std::process::exit(if result.success { 0 } else { 1 });
}
