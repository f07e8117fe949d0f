//! Command handlers.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chatmem::budget::{BudgetStatus, ComplexityBreakdown, FactorScore};
use chatmem::memory::MemoryStats;
use chatmem::{
    BudgetAllocator, BudgetValidator, ComplexityAnalyzer, Exchange, InteractionMode,
    MemorySession, MemoryStore, PreparedContext, Settings,
};
use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::{Cli, Command, RequestArgs};

/// Characters of message content shown in text output.
const PREVIEW_CHARS: usize = 120;

pub fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    let json = cli.json;

    match cli.command {
        Command::Estimate { text, actual } => estimate(&settings, &text, actual, json),
        Command::Analyze { query, mode } => {
            analyze(&query, mode.unwrap_or(settings.mode), json)
        }
        Command::Budget { query, request } => budget(&settings, &query, &request, json),
        Command::Context {
            query,
            model,
            request,
        } => context(&settings, &query, model, &request, json),
        Command::Record {
            user,
            assistant,
            model,
            user_tokens,
            assistant_tokens,
            window,
        } => {
            let mut session = open_session(&settings, model)?;
            if let Some(window) = window {
                session.set_context_window(window);
            }
            if !session.record_exchange(&user, &assistant, user_tokens, assistant_tokens) {
                bail!("failed to record exchange for {}", session.model());
            }
            if json {
                print_json(&json!({ "model": session.model(), "recorded": true }))
            } else {
                println!("{} exchange for {}", "Recorded".green(), session.model().bold());
                Ok(())
            }
        }
        Command::History {
            model,
            limit,
            max_tokens,
        } => {
            let model = model.unwrap_or_else(|| settings.default_model.clone());
            let exchanges = open_store(&settings)?.history(&model, Some(limit), max_tokens)?;
            if json {
                print_json(&exchanges)
            } else {
                print_history(&model, &exchanges);
                Ok(())
            }
        }
        Command::Stats { model } => {
            let model = model.unwrap_or_else(|| settings.default_model.clone());
            let stats = open_store(&settings)?.stats(&model)?;
            if json {
                print_json(&stats)
            } else {
                print_stats(&stats);
                Ok(())
            }
        }
        Command::Clear { model } => {
            let model = model.unwrap_or_else(|| settings.default_model.clone());
            let summary = open_store(&settings)?.clear(&model)?;
            if json {
                return print_json(&json!({ "model": model, "summary": summary }));
            }
            match summary {
                Some(summary) => println!(
                    "{} {} exchanges for {}",
                    "Cleared".green(),
                    summary.exchange_count,
                    model.bold()
                ),
                None => println!("Nothing to clear for {}", model.bold()),
            }
            Ok(())
        }
        Command::Models => {
            let models = open_store(&settings)?.list_models()?;
            if json {
                return print_json(&models);
            }
            if models.is_empty() {
                println!("No stored memory in {}", settings.memory_dir.display());
            }
            for model in models {
                println!("{}", model);
            }
            Ok(())
        }
        Command::Migrate { path } => {
            let store = open_store(&settings)?;
            let path = path.unwrap_or_else(|| store.legacy_path());
            let report = store
                .migrate_legacy(&path, &settings.default_model)
                .with_context(|| format!("failed to migrate {}", path.display()))?;
            if json {
                return print_json(&report);
            }
            if report.migrated_exchanges == 0 {
                println!("Nothing to migrate from {}", path.display());
            } else {
                println!(
                    "{} {} exchanges into {}",
                    "Migrated".green(),
                    report.migrated_exchanges,
                    report.models.join(", ")
                );
                if let Some(backup) = report.backup_path {
                    println!("Backup: {}", backup.display());
                }
            }
            Ok(())
        }
        Command::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = cli.config.clone().or_else(default_config_path);
    debug!(path = ?path, "Loading settings");

    let mut settings = Settings::load(path.as_deref()).context("failed to load settings")?;
    if let Some(memory_dir) = &cli.memory_dir {
        settings.memory_dir = memory_dir.clone();
    }
    Ok(settings)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("chatmem").join("config.toml"))
        .filter(|path| path.is_file())
}

fn open_store(settings: &Settings) -> Result<MemoryStore> {
    let store = MemoryStore::new(settings.store_config()).with_context(|| {
        format!(
            "failed to open memory directory {}",
            settings.memory_dir.display()
        )
    })?;
    Ok(store.with_estimator(settings.estimator.build()))
}

fn open_session(settings: &Settings, model: Option<String>) -> Result<MemorySession> {
    let mut session = MemorySession::open(settings).with_context(|| {
        format!(
            "failed to open memory directory {}",
            settings.memory_dir.display()
        )
    })?;
    if let Some(model) = model {
        session.set_model(model);
    }
    Ok(session)
}

fn estimate(settings: &Settings, text: &str, actual: Option<u64>, json: bool) -> Result<()> {
    let accuracy = settings.estimator.build().accuracy(text, actual);
    if json {
        return print_json(&accuracy);
    }

    println!("{} tokens", accuracy.estimated_tokens.to_string().bold());
    println!(
        "  {} characters, {:.2} characters per token",
        accuracy.text_length, accuracy.chars_per_token
    );
    if let (Some(actual), Some(ratio), Some(error_pct)) = (
        accuracy.actual_tokens,
        accuracy.estimation_ratio,
        accuracy.estimation_error_percent,
    ) {
        println!(
            "  actual {}, ratio {:.2}, error {:.1}%",
            actual, ratio, error_pct
        );
    }
    Ok(())
}

fn analyze(query: &str, mode: InteractionMode, json: bool) -> Result<()> {
    let breakdown = ComplexityAnalyzer::new().breakdown(query, mode);
    if json {
        return print_json(&breakdown);
    }
    print_breakdown(&breakdown, mode);
    Ok(())
}

fn budget(settings: &Settings, query: &str, request: &RequestArgs, json: bool) -> Result<()> {
    let mode = request.mode.unwrap_or(settings.mode);
    let window = request.window.unwrap_or(settings.context_window);
    if window == 0 {
        bail!("context window must be greater than zero");
    }

    let allocator = BudgetAllocator::new();
    let complexity = allocator.analyzer().analyze(query, mode);
    let allocation = allocator.allocate_with_complexity(
        window,
        mode,
        complexity,
        settings.minimum_memory_tokens,
    );
    let report = BudgetValidator::new(settings.validation).validate(&allocation, window, complexity);

    if json {
        return print_json(&json!({
            "mode": mode,
            "context_window": window,
            "complexity": complexity,
            "allocation": allocation,
            "validation": report,
        }));
    }

    println!(
        "{} {:.3} ({} mode)",
        "Complexity:".bold(),
        complexity,
        mode
    );
    let text = report.format();
    match report.status() {
        BudgetStatus::Ok => print!("{}", text.green()),
        BudgetStatus::Warning => print!("{}", text.yellow()),
        BudgetStatus::Exceeded => print!("{}", text.red()),
    }
    Ok(())
}

fn context(
    settings: &Settings,
    query: &str,
    model: Option<String>,
    request: &RequestArgs,
    json: bool,
) -> Result<()> {
    let mut session = open_session(settings, model)?;
    let mode = request.mode.unwrap_or(settings.mode);
    let window = request.window.unwrap_or(settings.context_window);

    let result = session.prepare_context_with(query, mode, window);
    if let Some(error) = result.error {
        bail!(error);
    }
    let Some(prepared) = result.prepared else {
        bail!("no context prepared for {}", session.model());
    };

    if json {
        return print_json(&prepared);
    }
    print_context(&prepared);
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_factor(name: &str, factor: &FactorScore) {
    println!(
        "  {:<10} {:.3} x {:.2}  {}",
        name,
        factor.score,
        factor.weight,
        factor.details.dimmed()
    );
}

fn print_breakdown(breakdown: &ComplexityBreakdown, mode: InteractionMode) {
    println!(
        "{} {:.3} ({} mode)",
        "Complexity:".bold(),
        breakdown.total,
        mode
    );
    print_factor("length", &breakdown.length);
    print_factor("keywords", &breakdown.keywords);
    print_factor("code", &breakdown.code);
    print_factor("questions", &breakdown.questions);
    println!("  {:<10} x {:.2}", "mode", breakdown.mode_adjustment);
}

fn print_context(prepared: &PreparedContext) {
    let stats = &prepared.stats;
    println!(
        "{} {} of {} exchanges, ~{} / {} memory tokens, {} response tokens",
        prepared.model.bold(),
        stats.included_exchanges,
        stats.available_exchanges,
        stats.estimated_memory_tokens,
        stats.memory_budget,
        stats.response_budget
    );
    println!(
        "  complexity {:.3}, utilization {:.1}%{}",
        prepared.complexity,
        stats.utilization_pct,
        if stats.adjusted { ", adjusted to fit" } else { "" }
    );
    for message in &prepared.messages {
        println!("[{}] {}", message.role.to_string().cyan(), preview(&message.content));
    }
}

fn print_history(model: &str, exchanges: &[Exchange]) {
    if exchanges.is_empty() {
        println!("No history for {}", model.bold());
        return;
    }
    for exchange in exchanges {
        let local = exchange.timestamp.with_timezone(&chrono::Local);
        println!(
            "{} ({} tokens)",
            local.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            exchange.token_count()
        );
        println!("  {} {}", "user:".cyan(), preview(&exchange.user.content));
        println!("  {} {}", "assistant:".cyan(), preview(&exchange.assistant.content));
    }
}

fn print_stats(stats: &MemoryStats) {
    println!("{}", stats.model.bold());
    println!("  exchanges:   {}", stats.total_exchanges);
    println!("  tokens:      {}", stats.total_tokens);
    println!("  summarized:  {}", stats.summarized_conversations);
    println!("  created:     {}", stats.created_at.to_rfc3339());
    println!("  modified:    {}", stats.last_modified.to_rfc3339());
    if let Some(range) = &stats.date_range {
        println!(
            "  range:       {} .. {}",
            range.start.to_rfc3339(),
            range.end.to_rfc3339()
        );
    }
    println!(
        "  file:        {}{}",
        stats.memory_file.display(),
        if stats.persisted { "" } else { " (not yet written)" }
    );
}

fn preview(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= PREVIEW_CHARS {
        return single_line;
    }
    let truncated: String = single_line.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let text = "é".repeat(200);
        let shown = preview(&text);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_preview_flattens_newlines() {
        assert_eq!(preview("a\nb"), "a b");
    }
}
