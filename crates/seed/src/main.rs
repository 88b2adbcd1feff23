use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bodega_infra::BodegaConfig;
use bodega_seed::{DemoScenario, RandomRun, SeedSummary};

/// Seed an in-memory bodega tenant and print what was created.
#[derive(Debug, Parser)]
#[command(name = "bodega-seed", version)]
struct Cli {
    /// Print the summary as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fixed two-month demo for a Salvadoran foundation.
    Demo,
    /// Random catalog and movements, reproducible from a seed.
    Random {
        #[arg(long, default_value_t = 25)]
        products: usize,
        #[arg(long, default_value_t = 500)]
        movements: usize,
        #[arg(long, default_value_t = 2025)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BodegaConfig::load().context("failed to load configuration")?;
    bodega_observability::init_with(&config.logging.filter, config.logging.json);

    let summary = match cli.command {
        Command::Demo => DemoScenario::run(config)
            .context("demo scenario failed")?
            .summary()?,
        Command::Random {
            products,
            movements,
            seed,
        } => {
            let run = RandomRun {
                products,
                movements,
                seed,
            };
            run.run(config).context("random seeding failed")?.1
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_text(&summary);
    }
    Ok(())
}

fn print_text(summary: &SeedSummary) {
    println!("tenant     {}", summary.tenant_id);
    println!("products   {}", summary.products);
    println!("movements  {}", summary.movements);
    println!();
    for w in &summary.warehouses {
        println!(
            "{:<6} {:<32} rows {:>3}  qty {:>10}  value {:>12}  alerts {}",
            w.code, w.name, w.stock_rows, w.quantity, w.value, w.alerts
        );
    }
    if !summary.closures.is_empty() {
        println!();
    }
    for c in &summary.closures {
        println!(
            "{:<6} {} {:<10} qty {:>10}  value {:>12}  discrepancies {} ({})",
            c.warehouse, c.period, c.status, c.closing_quantity, c.closing_value, c.discrepancies, c.discrepancy_value
        );
    }
}
