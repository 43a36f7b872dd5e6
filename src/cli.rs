//! Interface de linha de comando do codemorph baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, stop)
//! e flags globais (--config, --verbose).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// codemorph: transformação remota de projetos Java entre versões do JDK.
#[derive(Debug, Parser)]
#[command(name = "codemorph", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para um arquivo de configuração (padrão: ./codemorph.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Empacota, envia e transforma um projeto.
    Run {
        /// Diretório raiz do projeto.
        project: PathBuf,

        /// Versão de origem do JDK.
        #[arg(long, default_value = "JDK8")]
        source: String,

        /// Versão de destino do JDK.
        #[arg(long, default_value = "JDK17")]
        target: String,

        /// Nome do projeto (padrão: nome do diretório).
        #[arg(long)]
        name: Option<String>,

        /// Diretório com dependências já resolvidas para enviar junto.
        #[arg(long)]
        dependencies: Option<PathBuf>,
    },

    /// Interrompe um job remoto em andamento.
    Stop {
        /// Identificador do job.
        job_id: String,
    },
}
