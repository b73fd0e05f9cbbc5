//! `cellarledger-audit`: replay a journal and verify every stock line.
//!
//! # Usage
//!
//! ```bash
//! # Verify, quarantining lines that disagree with their history
//! cellarledger-audit /var/lib/cellar/journal.jsonl
//!
//! # Report only; nothing is appended to the journal
//! cellarledger-audit --dry-run --json
//! ```
//!
//! Inconsistent lines make the process exit with status 1.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;

use cellarledger_core::UserId;
use cellarledger_events::ProjectionRunner;
use cellarledger_infra::{LedgerConfig, LedgerStore, StockSummaryProjection, VerificationReport, WarehouseService};
use cellarledger_warehouse::CommandContext;

#[derive(Debug, Parser)]
#[command(name = "cellarledger-audit")]
#[command(version, about = "Replay a cellar journal and verify every stock line")]
struct Cli {
    /// Journal file to audit
    #[arg(env = "CELLAR_JOURNAL_PATH")]
    journal: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Also print per product and owner totals
    #[arg(long)]
    summary: bool,

    /// Report inconsistencies without quarantining them
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    cellarledger_observability::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "audit failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the ledger verified clean.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = LedgerConfig::from_env().context("reading ledger configuration")?;
    if let Some(path) = cli.journal {
        config = config.with_journal_path(path);
    }
    let Some(path) = config.journal_path.clone() else {
        bail!("no journal given: pass a path or set CELLAR_JOURNAL_PATH");
    };
    if !path.is_file() {
        bail!("journal {} does not exist", path.display());
    }

    let store = LedgerStore::open_configured(config)
        .with_context(|| format!("replaying journal {}", path.display()))?;
    let commits = store.commit_sequence()?;
    let service = WarehouseService::new(store);

    let report = if cli.dry_run {
        service.check_all().context("checking stock lines")?
    } else {
        service
            .verify_all(&CommandContext::new(UserId::new()).with_notes("journal audit"))
            .context("verifying stock lines")?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(commits, &report, !cli.dry_run);
    }

    if cli.summary {
        let envelopes = service.store().envelopes()?;
        let (summary, _) = ProjectionRunner::rebuild_from_scratch(StockSummaryProjection::new, &envelopes)
            .context("rebuilding stock summary")?;
        for row in summary.list() {
            println!(
                "{} {:<10} qty={:>7} reserved={:>7} palletised={:>7} lines={}",
                row.product,
                row.owner.as_str(),
                row.quantity_cases, row.reserved_cases, row.palletised_cases, row.lines
            );
        }
    }

    Ok(report.is_consistent())
}

fn print_report(commits: u64, report: &VerificationReport, quarantined: bool) {
    println!(
        "replayed {commits} commit(s); checked {} stock line(s); {} inconsistent",
        report.checked,
        report.inconsistent.len()
    );
    let marker = if quarantined { "  (quarantined)" } else { "" };
    for check in &report.inconsistent {
        let replayed = check
            .replayed
            .map_or_else(|| "unreplayable".to_string(), |(q, r)| format!("{q}/{r}"));
        println!(
            "  {}  stored {}/{}  replayed {replayed}{marker}",
            check.line, check.stored.0, check.stored.1
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(list: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("cellarledger-audit").chain(list.iter().copied()))
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn path_and_flags_in_any_order() {
        let cli = parse(&["--summary", "cellar.jsonl", "--json", "--dry-run"]).unwrap();
        assert_eq!(cli.journal, Some(PathBuf::from("cellar.jsonl")));
        assert!(cli.json && cli.summary && cli.dry_run);
    }

    #[test]
    fn audit_quarantines_unless_dry_run() {
        let cli = parse(&["cellar.jsonl"]).unwrap();
        assert!(!cli.dry_run && !cli.json && !cli.summary);
    }

    #[test]
    fn rejects_unknown_flags_and_second_path() {
        assert!(parse(&["--fix"]).is_err());
        assert!(parse(&["a.jsonl", "b.jsonl"]).is_err());
    }
}
