use anyhow::Result;
use tracing::info;

use telco_systest::config::SystestConfig;
use telco_systest::soak;
use telco_systest::stability::{self, StabilityVerdict};

use crate::cli::StabilityAction;

pub async fn run(config: &SystestConfig, action: StabilityAction) -> Result<()> {
    match action {
        StabilityAction::Run => run_soak(config).await,
        StabilityAction::Verify { files } => verify(&files),
    }
}

async fn run_soak(config: &SystestConfig) -> Result<()> {
    let client = super::connect(config).await?;
    let cfg = &config.stability;

    println!("Starting stability soak...\n");
    println!("  Output directory ............ {}", cfg.output_dir.display());
    println!("  Duration .................... {}s", cfg.duration_secs);
    println!("  Interval .................... {}s", cfg.interval_secs);
    println!("\nSampling. Press Ctrl+C to stop early.\n");

    let report = soak::run_soak(client, cfg).await;

    println!("{}", "=".repeat(70));
    println!(
        "  Rounds: {}   Failed samples: {}{}",
        report.rounds,
        report.failed_samples,
        if report.interrupted { "   (interrupted)" } else { "" }
    );
    for file in &report.files {
        let status = match &file.verdict {
            Ok(StabilityVerdict::Stable) => "STABLE".to_string(),
            Ok(StabilityVerdict::Changed(c)) => format!("CHANGED ({c})"),
            Err(e) => format!("ERROR ({e})"),
        };
        println!("  {:<60} {}", file.job.path.display(), status);
    }
    println!("{}", "=".repeat(70));

    info!(rounds = report.rounds, stable = report.is_stable(), "soak_finished");
    report.into_result()
}

fn verify(files: &[std::path::PathBuf]) -> Result<()> {
    let mut failed = 0;

    for path in files {
        match stability::verify_log(path) {
            Ok(StabilityVerdict::Stable) => println!("  {:<60} STABLE", path.display()),
            Ok(StabilityVerdict::Changed(c)) => {
                failed += 1;
                println!("  {:<60} CHANGED ({c})", path.display());
            }
            Err(e) => {
                failed += 1;
                println!("  {:<60} ERROR ({e:#})", path.display());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} stability log(s) not stable", files.len());
    }
    Ok(())
}
