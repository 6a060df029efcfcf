//! Daily reconciliation run example

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use conciliacion_core::utils::{MemoryStorage, StaticDirectory, StaticTotals};
use conciliacion_core::{
    BulkOutcome, CentralizadoraUpdate, ReconciliationEngine, ReconciliationSummary, Totals,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧾 Conciliacion Core - Daily Close Example\n");

    let date = NaiveDate::from_ymd_opt(2024, 3, 15).ok_or("invalid date")?;

    // Subtotals as the aggregator would report them
    let totals = StaticTotals::new();
    totals.set(
        "norte",
        date,
        Totals::new(BigDecimal::from(1_000_000), BigDecimal::from(500_000)),
    );
    totals.set(
        "sur",
        date,
        Totals::new(BigDecimal::from(250_000), BigDecimal::from(50_000)),
    );
    totals.set(
        "900.123.456-7",
        date,
        Totals::new(BigDecimal::from(80_000), BigDecimal::from(0)),
    );

    let engine = ReconciliationEngine::new(
        MemoryStorage::new(),
        totals,
        StaticDirectory::new(["norte", "sur", "900.123.456-7"]),
    );

    // 1. Load the ledger totals reported for the day
    println!("📥 Loading centralizadora totals...");
    for (company, reported) in [
        ("norte", 1_400_000),
        ("sur", 300_000),
        ("900.123.456-7", 80_000),
    ] {
        engine
            .set_centralizadora(
                company,
                date,
                CentralizadoraUpdate::total(BigDecimal::from(reported)),
            )
            .await?;
    }
    engine
        .set_centralizadora(
            "norte",
            date,
            CentralizadoraUpdate::observaciones("Payroll batch posted after ledger cut-off"),
        )
        .await?;

    print_day(&engine.summaries_for_date(date).await?);

    // 2. Evaluate everything, then confirm one company by hand
    println!("🔎 Evaluating all companies...");
    let report = engine.evaluate_all(date).await?;
    println!(
        "  ✓ {} evaluated, {} skipped\n",
        report.succeeded(),
        report.skipped()
    );

    engine.confirm("sur", date).await?;

    // 3. Close the day
    println!("🔒 Closing the day...");
    let report = engine.close_all(date).await?;
    for entry in &report.entries {
        match &entry.outcome {
            BulkOutcome::Succeeded { from, to } => {
                println!("  ✓ {}: {} → {}", entry.company_id, from, to)
            }
            BulkOutcome::Skipped { estado } => {
                println!("  - {}: skipped ({})", entry.company_id, estado)
            }
            BulkOutcome::Failed { kind, reason } => {
                println!("  ✗ {}: {} {}", entry.company_id, kind.code(), reason)
            }
            BulkOutcome::Cancelled => println!("  - {}: cancelled", entry.company_id),
        }
    }
    println!();

    // 4. Closed records are frozen
    let locked = engine
        .set_centralizadora(
            "norte",
            date,
            CentralizadoraUpdate::total(BigDecimal::from(2_000_000)),
        )
        .await;
    if let Err(e) = locked {
        println!("🚫 Late edit rejected: {} ({})\n", e, e.kind().code());
    }

    let summary = engine.daily_summary(date).await?;
    println!("📊 Day summary for {}", summary.date);
    for (estado, count) in &summary.by_estado {
        println!("  {:<11} {}", estado.as_str(), count);
    }
    println!("  Calculado:      {}", summary.total_calculado);
    println!("  Centralizadora: {}", summary.total_centralizadora);
    println!("  Diferencia:     {}", summary.diferencia);
    println!("  Unbalanced:     {}", summary.unbalanced);

    Ok(())
}

fn print_day(summaries: &[ReconciliationSummary]) {
    for s in summaries {
        println!(
            "  {:<14} calculado {:>12} centralizadora {:>12} diferencia {:>10} ({:?})",
            s.company_id, s.total_calculado, s.total_centralizadora, s.diferencia, s.classification
        );
    }
    println!();
}
