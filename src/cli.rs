//! Interface de linha de comando do pacekeeper baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status, limits,
//! reset, abandon, workflows) e flags globais (--config, --safety-level, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::limiter::{ActionType, SafetyLevel};
use crate::workflow::WorkflowType;

/// pacekeeper: executa lotes de ações respeitando cotas, horário e retomada.
#[derive(Debug, Parser)]
#[command(name = "pacekeeper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./pacekeeper.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Nível de segurança para esta sessão; tem precedência sobre arquivo e ambiente.
    #[arg(long, global = true)]
    pub safety_level: Option<SafetyArg>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Nível de segurança aceito pela CLI, mapeado para [`SafetyLevel`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SafetyArg {
    /// Para contas já sob risco.
    UltraConservative,
    /// Padrão recomendado.
    Conservative,
    Moderate,
    /// Alto risco, não recomendado.
    Aggressive,
}

impl From<SafetyArg> for SafetyLevel {
    fn from(arg: SafetyArg) -> Self {
        match arg {
            SafetyArg::UltraConservative => SafetyLevel::UltraConservative,
            SafetyArg::Conservative => SafetyLevel::Conservative,
            SafetyArg::Moderate => SafetyLevel::Moderate,
            SafetyArg::Aggressive => SafetyLevel::Aggressive,
        }
    }
}

/// Tipo de workflow aceito pela CLI.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WorkflowArg {
    Search,
    Connect,
    Message,
}

impl From<WorkflowArg> for WorkflowType {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::Search => WorkflowType::Search,
            WorkflowArg::Connect => WorkflowType::Connect,
            WorkflowArg::Message => WorkflowType::Message,
        }
    }
}

impl From<WorkflowArg> for ActionType {
    fn from(arg: WorkflowArg) -> Self {
        WorkflowType::from(arg).action()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processa um lote de itens, retomando o workflow pausado do mesmo tipo.
    Run {
        /// Tipo de workflow.
        #[arg(value_enum)]
        workflow: WorkflowArg,

        /// Itens a processar (alvos, perfis, termos de busca).
        items: Vec<String>,

        /// Arquivo com um item por linha; linhas vazias e `#` são ignoradas.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Ignora a janela de trabalho configurada.
        #[arg(long, default_value_t = false)]
        ignore_schedule: bool,

        /// Imprime o relatório final em JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Mostra uso das cotas, agenda de hoje e workflows retomáveis.
    Status,

    /// Mostra os limites resolvidos para o nível de segurança atual.
    Limits,

    /// Zera o estado do limitador para um tipo de ação.
    Reset {
        #[arg(value_enum)]
        action: WorkflowArg,
    },

    /// Marca como falhos os workflows pausados de um tipo.
    Abandon {
        #[arg(value_enum)]
        workflow: WorkflowArg,
    },

    /// Lista os workflows registrados, mais recentes primeiro.
    Workflows {
        /// Filtra por tipo.
        #[arg(long = "type", value_enum)]
        workflow: Option<WorkflowArg>,
    },
}
