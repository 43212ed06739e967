//! Interface de terminal do pacekeeper: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso de um lote e `console`
//! para estilização com cores. O [`RunProgress`] acompanha visualmente a
//! execução de um workflow no terminal.

use std::time::Duration;

use chrono::Local;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::limiter::{ActionStats, SafetyLevel};
use crate::schedule::{SchedulePhase, ScheduleState};
use crate::workflow::{RunReport, StopReason, WorkflowState, WorkflowStatus, WorkflowType};

/// Indicador visual de progresso para um lote de itens.
///
/// O resumo final usa verde para concluído, vermelho para falho e amarelo para pausado.
pub struct RunProgress {
    // Barra do indicatif; a posição inicial é o cursor do workflow retomado.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia a barra para `total` itens, já avançada até `position`.
    pub fn start(workflow_type: WorkflowType, total: u64, position: u64) -> Self {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.cyan} {prefix} [{bar:30.cyan/blue}] {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_prefix(workflow_type.to_string());
        pb.set_position(position);
        pb.enable_steady_tick(Duration::from_millis(120));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Avança uma posição e mostra o item processado.
    pub fn advance(&self, item: &str) {
        self.pb.inc(1);
        self.pb.set_message(item.to_string());
    }

    /// Exibe um item rejeitado sem interromper a barra.
    pub fn rejected(&self, item: &str, reason: &str) {
        self.pb.inc(1);
        self.pb
            .println(format!("  {} {item}: {reason}", self.yellow.apply_to("↷")));
    }

    /// Finaliza a barra e imprime o resumo da execução.
    pub fn finish(&self, report: &RunReport) {
        self.pb.finish_and_clear();
        let (mark, style) = match (report.status, report.stop_reason) {
            (WorkflowStatus::Completed, _) => ("✓", &self.green),
            (WorkflowStatus::Failed, _) => ("✗", &self.red),
            (_, StopReason::Shutdown) => ("■", &self.yellow),
            _ => ("‖", &self.yellow),
        };
        println!(
            "  {} {} {}/{}: {}",
            style.apply_to(mark),
            report.workflow_type,
            report.current_index,
            report.total_items,
            report.stop_reason
        );
        println!(
            "    {} ok, {} rejected, {} failures in {}",
            report.counters.succeeded,
            report.counters.rejected,
            report.counters.system_failures,
            format_duration(Duration::from_millis(report.duration_ms.max(0) as u64))
        );
        if report.status == WorkflowStatus::Paused {
            println!("    run again to resume from item {}", report.current_index);
        }
    }
}

/// Imprime o relatório completo em JSON.
pub fn print_report_json(report: &RunReport) {
    println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
}

/// Tabela de uso por tipo de ação.
pub fn print_stats(level: SafetyLevel, stats: &[ActionStats]) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to(format!("Safety level: {level}")));
    for s in stats {
        let style = if s.in_cooldown() || s.daily_remaining == 0 {
            Style::new().red()
        } else if s.hourly_remaining == 0 {
            Style::new().yellow()
        } else {
            Style::new().green()
        };
        println!("  {}", style.apply_to(stats_line(s)));
    }
}

/// Janela de hoje e a fase atual do agendador.
pub fn print_schedule(work_day: bool, phase: SchedulePhase, today: &ScheduleState) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("Schedule"));
    if !work_day {
        println!("  not a work day");
        return;
    }
    let fmt = |at: chrono::DateTime<chrono::Utc>| at.with_timezone(&Local).format("%H:%M").to_string();
    println!("  window {} - {}", fmt(today.window_start), fmt(today.window_end));
    println!(
        "  lunch  {} - {}",
        fmt(today.break_start),
        fmt(today.break_end())
    );
    println!("  phase  {phase}");
}

/// Lista de workflows, mais recentes primeiro.
pub fn print_workflows(workflows: &[WorkflowState]) {
    if workflows.is_empty() {
        println!("no workflows recorded");
        return;
    }
    for wf in workflows {
        let style = match wf.status {
            WorkflowStatus::Completed => Style::new().green(),
            WorkflowStatus::Failed => Style::new().red(),
            WorkflowStatus::Paused => Style::new().yellow(),
            WorkflowStatus::InProgress => Style::new().cyan(),
        };
        let mut line = format!(
            "{}  {:<8} {:<11} {}/{}  started {}",
            &wf.id[..wf.id.len().min(8)],
            wf.workflow_type.as_str(),
            wf.status.as_str(),
            wf.current_index,
            wf.total_items,
            wf.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
        if let Some(err) = &wf.error_message {
            line.push_str(&format!("  ({err})"));
        }
        println!("{}", style.apply_to(line));
    }
}

/// Uma linha de texto simples por tipo de ação.
pub fn stats_line(s: &ActionStats) -> String {
    let mut line = format!(
        "{:<8} day {}/{}  hour {}/{}  burst {}/{}",
        s.action.as_str(), s.daily_count, s.daily_limit, s.hourly_count, s.hourly_limit, s.burst_count, s.burst_limit
    );
    if let Some(remaining) = s.cooldown_remaining {
        line.push_str(&format!("  cooldown {}", format_duration(remaining)));
    }
    if let Some(since) = s.since_last_action {
        line.push_str(&format!("  last {} ago", format_duration(since)));
    }
    line
}

/// "2h 05m", "7m 30s" ou "42s".
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
