use console::style;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::commands::ScanArgs;
use crate::errors::ScanError;
use crate::events::{EventBus, ScanEvent};
use crate::models::{LogLevel, QuestionPrompt, Severity};
use crate::orchestrator::{ScanOrchestrator, ScanOutcome};
use crate::questions::QuestionBank;

pub async fn handle_scan(args: ScanArgs) -> Result<(), ScanError> {
    let raw = json!({
        "url": args.url,
        "flags": { "sqli": args.sqli, "xss": args.xss },
        "dbms": args.dbms,
        "crawl_depth": args.depth,
        "level": args.level,
        "risk": args.risk,
        "threads": args.threads,
        "tool_timeout_secs": args.timeout,
        "xss_workers": args.workers,
        "xss_delay_ms": args.delay,
        "enable_exploitation": args.exploit,
        "headers": args.headers.join("\n"),
        "sqlmap_path": args.sqlmap_path,
        "dalfox_path": args.dalfox_path,
    });
    let config = crate::config::validate(&raw)?;

    let questions = match &args.questions {
        Some(dir) => QuestionBank::load(std::path::Path::new(dir))?,
        None => QuestionBank::builtin(),
    };

    let bus = Arc::new(EventBus::new());
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ScanEvent>();
    bus.set_sink(event_tx);

    let scan_id = uuid::Uuid::new_v4().to_string();
    let orchestrator = Arc::new(ScanOrchestrator::new(
        &scan_id,
        config,
        bus,
        Arc::new(questions),
    ));

    let renderer = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { render_events(event_rx, orchestrator).await })
    };

    let mut run_task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };

    let result = tokio::select! {
        result = &mut run_task => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}", style("Deteniendo el escaneo...").yellow());
            orchestrator.stop().await;
            run_task.await
        }
    };

    renderer.abort();

    match result.map_err(|e| ScanError::Internal(format!("scan task panicked: {}", e)))?? {
        ScanOutcome::Completed(report) => {
            println!();
            println!(
                "{} {} ({})",
                style("Puntuación final:").bold(),
                style(report.score.final_score).bold().green(),
                report.score.grade
            );
            println!(
                "Cuestionario: {}/{} — Vulnerabilidades: {}",
                report.score.quiz_points,
                report.score.total_quiz_points,
                report.vulnerabilities.len()
            );
            Ok(())
        }
        ScanOutcome::Stopped => {
            println!("{}", style("Escaneo detenido").yellow());
            Ok(())
        }
    }
}

fn severity_style(severity: Severity) -> console::StyledObject<&'static str> {
    match severity {
        Severity::Critical => style("CRITICAL").red().bold(),
        Severity::High => style("HIGH").red(),
        Severity::Medium => style("MEDIUM").yellow(),
        Severity::Low => style("LOW").dim(),
    }
}

async fn render_events(
    mut event_rx: mpsc::UnboundedReceiver<ScanEvent>,
    orchestrator: Arc<ScanOrchestrator>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ScanEvent::PhaseStarted { phase, .. } => {
                println!("\n{} {}", style("==>").cyan().bold(), style(phase).cyan().bold());
            }
            ScanEvent::PhaseCompleted { phase, .. } => {
                println!("{} fase {} completada", style("ok").green(), phase);
            }
            ScanEvent::SubphaseStarted { subphase, .. } => {
                println!("  {} {}", style("->").cyan(), subphase);
            }
            ScanEvent::LogAdded { entry, .. } => {
                let level = match entry.level {
                    LogLevel::Success => style(entry.level.as_str()).green(),
                    LogLevel::Warning => style(entry.level.as_str()).yellow(),
                    LogLevel::Error => style(entry.level.as_str()).red(),
                    _ => style(entry.level.as_str()).dim(),
                };
                println!("  [{}] {}", level, entry.message);
            }
            ScanEvent::VulnerabilityFound { vulnerability, .. } => {
                println!(
                    "  {} [{}] {} — parámetro '{}'",
                    style("!!").red().bold(),
                    severity_style(vulnerability.severity),
                    vulnerability.endpoint,
                    vulnerability.parameter
                );
            }
            ScanEvent::QuestionAsked { prompt, .. } => {
                ask_on_stdin(&prompt, &orchestrator).await;
            }
            ScanEvent::QuestionResult { result, .. } => {
                if result.correct {
                    println!(
                        "  {} (+{} puntos)",
                        style("Respuesta correcta").green().bold(),
                        result.points_earned
                    );
                } else {
                    print!("{}", style("Respuesta incorrecta, prueba de nuevo: ").red());
                    answer_from_stdin(&orchestrator).await;
                }
            }
            ScanEvent::ScanError { error, .. } => {
                eprintln!("{} {}", style("ERROR:").red().bold(), error);
            }
            _ => {}
        }
    }
}

async fn ask_on_stdin(prompt: &QuestionPrompt, orchestrator: &Arc<ScanOrchestrator>) {
    println!();
    println!("{}", style(&prompt.text).bold());
    for (i, option) in prompt.options.iter().enumerate() {
        println!("  {}. {}", i + 1, option);
    }
    print!("Respuesta (1-{}): ", prompt.options.len());
    answer_from_stdin(orchestrator).await;
}

/// Reads one 1-based answer from stdin and forwards it to the gate.
async fn answer_from_stdin(orchestrator: &Arc<ScanOrchestrator>) {
    use std::io::Write;
    let _ = std::io::stdout().flush();
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await;
    if let Ok(Ok(line)) = line {
        if let Ok(selected) = line.trim().parse::<usize>() {
            if selected > 0 {
                orchestrator.answer_question(selected - 1);
            }
        }
    }
}
