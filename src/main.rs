mod classifier;
mod cli;
mod config;
mod error;
mod events;
mod hil;
mod history;
mod logging;
mod orchestrator;
mod packager;
mod remote;
mod state_machine;
#[cfg(test)]
mod test_support;
mod timer;
mod ui;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use console::Style;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command};
use config::CodemorphConfig;
use hil::{HilHandle, MavenResolver, UserChoice, VersionChoice};
use orchestrator::JobOrchestrator;
use packager::ZipPackager;
use remote::{HttpJobClient, RemoteJobClient};
use state_machine::{JobId, JobRequest, JobState};
use ui::{TerminalUi, parse_answer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = CodemorphConfig::load(cli.config.as_deref())?;
    let client = Arc::new(HttpJobClient::new(&config.endpoint, &config.api_token)?);

    let succeeded = match cli.command {
        Command::Run {
            project,
            source,
            target,
            name,
            dependencies,
        } => {
            let mut request = JobRequest::new(project, source, target);
            if let Some(name) = name {
                request.project_name = name;
            }
            request.dependencies_dir = dependencies;
            run_transformation(&config, client, request).await
        }
        Command::Stop { job_id } => {
            let job_id = JobId::new(job_id);
            client.stop(&job_id).await?;
            println!("  {} Stop requested for job {job_id}", Style::new().green().apply_to("✓"));
            true
        }
    };

    // A pending stdin read must not keep the process alive.
    std::process::exit(if succeeded { 0 } else { 1 });
}

async fn run_transformation(
    config: &CodemorphConfig,
    client: Arc<HttpJobClient>,
    request: JobRequest,
) -> bool {
    let (ui, prompts) = TerminalUi::new();
    let orchestrator = JobOrchestrator::new(
        client,
        Arc::new(ZipPackager::default()),
        Arc::new(MavenResolver::new(&config.maven_command)),
        Arc::new(ui),
        config.orchestrator_settings(),
    );

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping");
                cancel.cancel();
            }
        })
    };
    let answers = tokio::spawn(answer_prompts(prompts, orchestrator.hil_handle()));

    let mut state = JobState::new();
    let outcome = orchestrator.run_job(&mut state, request, &cancel).await;

    ctrl_c.abort();
    answers.abort();
    for entry in orchestrator.history().entries() {
        tracing::debug!(
            job_id = %entry.job_id,
            project = %entry.project_name,
            status = %entry.status,
            duration_ms = entry.duration_ms,
            "history"
        );
    }
    outcome.is_success()
}

/// Read one stdin answer per pending version choice.
async fn answer_prompts(
    mut prompts: tokio::sync::mpsc::UnboundedReceiver<VersionChoice>,
    handle: HilHandle,
) {
    while let Some(choice) = prompts.recv().await {
        let answer = loop {
            let line = match tokio::task::spawn_blocking(read_line).await {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "failed to read answer");
                    String::new()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "answer reader failed");
                    String::new()
                }
            };
            match parse_answer(&line, &choice) {
                Some(answer) => break answer,
                None => println!("  Unknown choice {:?}, try again:", line.trim()),
            }
        };
        let delivered = match answer {
            UserChoice::Version(version) => handle.submit_choice(version),
            UserChoice::Reject => handle.reject(),
        };
        if let Err(e) = delivered {
            tracing::warn!(error = %e, "answer not delivered");
        }
    }
}

fn read_line() -> std::io::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
