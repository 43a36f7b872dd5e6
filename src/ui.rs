//! Interface de terminal do codemorph: spinner de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner e `console` para estilização com
//! cores. O [`TerminalUi`] implementa [`JobEvents`] e acompanha visualmente a
//! execução de um job; pedidos de escolha de versão são repassados por um
//! canal para quem lê a entrada do usuário.

use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::classifier::Classification;
use crate::events::JobEvents;
use crate::hil::{CodeExcerpt, UserChoice, VersionChoice};
use crate::state_machine::{
    JobId, JobOutcome, JobSnapshot, JobStatus, PlanStep, ProgressMarkers, StepState,
};

/// Indicador visual de progresso para a execução de um job no terminal.
pub struct TerminalUi {
    // Spinner do indicatif, ativo entre progress_started e progress_stopped.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
    // Escolhas pendentes enviadas ao leitor de stdin.
    prompts: mpsc::UnboundedSender<VersionChoice>,
}

impl TerminalUi {
    /// Cria a interface e o receptor das escolhas de versão pendentes.
    ///
    /// O spinner é desenhado em stdout; stderr fica reservado para os logs.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VersionChoice>) {
        let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        let (prompts, rx) = mpsc::unbounded_channel();
        let ui = Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            prompts,
        };
        (ui, rx)
    }

    fn print(&self, line: String) {
        self.pb.suspend(|| println!("{line}"));
    }
}

impl JobEvents for TerminalUi {
    fn progress_started(&self) {
        self.pb.set_message("Uploading project");
        self.pb.enable_steady_tick(Duration::from_millis(100));
    }

    fn progress_tick(&self, elapsed: Duration, snapshot: &JobSnapshot) {
        self.pb.set_message(format!(
            "{} {} {}",
            snapshot.status,
            marker_line(&snapshot.markers),
            self.dim.apply_to(format_elapsed(elapsed))
        ));
    }

    fn progress_stopped(&self, _elapsed: Duration) {
        self.pb.finish_and_clear();
    }

    fn job_started(&self, job_id: &JobId) {
        self.print(format!("  Job {job_id} started"));
    }

    fn plan_ready(&self, steps: &[PlanStep], summary_path: Option<&Path>) {
        let mut lines = vec![format!("  {}", self.green.apply_to("Transformation plan"))];
        for (i, step) in steps.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, step.name));
        }
        if let Some(path) = summary_path {
            lines.push(format!("    {}", self.dim.apply_to(path.display())));
        }
        self.print(lines.join("\n"));
    }

    fn hil_started(&self, excerpt: &CodeExcerpt) {
        let mut lines = vec![format!(
            "  {} The job needs a dependency update ({}:{})",
            self.yellow.apply_to("?"),
            excerpt.file_name,
            excerpt.start_line
        )];
        for line in excerpt.text.lines() {
            lines.push(format!("    {}", self.dim.apply_to(line)));
        }
        self.print(lines.join("\n"));
    }

    fn hil_awaiting_choice(&self, choice: &VersionChoice) {
        let mut lines = vec![format!(
            "  Choose a version of {} (current {}):",
            choice.dependency, choice.dependency.current_version
        )];
        for (i, version) in choice.versions.candidates().iter().enumerate() {
            lines.push(format!("    {}) {version}", i + 1));
        }
        lines.push("  Number or version, empty to skip:".to_string());
        self.print(lines.join("\n"));
        if self.prompts.send(choice.clone()).is_err() {
            tracing::warn!("no reader for version choices");
        }
    }

    fn hil_upload_complete(&self, version: &str) {
        self.print(format!(
            "  {} Uploaded dependencies for version {version}",
            self.green.apply_to("✓")
        ));
    }

    fn hil_failed(&self, failure: &Classification) {
        self.print(format!(
            "  {} {}",
            self.yellow.apply_to("!"),
            failure.chat_message
        ));
    }

    /// Exibe o resultado final: verde para sucesso, vermelho para falha.
    fn job_finished(&self, outcome: &JobOutcome) {
        let mark = match outcome.status {
            JobStatus::Succeeded => self.green.apply_to("✓"),
            JobStatus::PartiallySucceeded | JobStatus::Cancelled => self.yellow.apply_to("!"),
            _ => self.red.apply_to("✗"),
        };
        let mut lines = vec![format!("  {mark} {}", outcome.message)];
        if let Some(chat) = &outcome.failure_chat_message
            && outcome.status == JobStatus::Failed
        {
            lines.push(format!("    {chat}"));
        }
        if let Some(path) = &outcome.plan_summary_path {
            lines.push(format!("    Plan: {}", path.display()));
        }
        if let Some(path) = &outcome.build_log_path {
            lines.push(format!("    Build log: {}", path.display()));
        }
        self.print(lines.join("\n"));
    }
}

/// Interpreta a resposta do usuário: número (1-based), versão literal, ou
/// vazio para recusar.
pub fn parse_answer(input: &str, choice: &VersionChoice) -> Option<UserChoice> {
    let input = input.trim();
    if input.is_empty() {
        return Some(UserChoice::Reject);
    }
    let candidates = choice.versions.candidates();
    if let Ok(n) = input.parse::<usize>()
        && let Some(version) = n.checked_sub(1).and_then(|i| candidates.get(i))
    {
        return Some(UserChoice::Version(version.clone()));
    }
    choice
        .offers(input)
        .then(|| UserChoice::Version(input.to_string()))
}

fn marker_line(markers: &ProgressMarkers) -> String {
    [
        ("upload", markers.upload_code),
        ("build", markers.build_code),
        ("transform", markers.transform_code),
        ("return", markers.return_code),
    ]
    .iter()
    .map(|(name, state)| {
        let glyph = match state {
            StepState::NotStarted => "·",
            StepState::InProgress => "…",
            StepState::Succeeded => "✓",
            StepState::Failed => "✗",
        };
        format!("{name} {glyph}")
    })
    .collect::<Vec<_>>()
    .join("  ")
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
