//! Ternary Guard - command line entry point
//!
//! - `verify`: offline audit of a chain (exit 0 intact, 1 broken, 2 error)
//! - `simulate`: drive a development pipeline with a synthetic stream

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ternary_guard::logic::resolution::HttpResolver;
use ternary_guard::{verify_chain, GuardConfig, GuardPipeline, Keyring, Packet};

const EXIT_BROKEN: u8 = 1;
const EXIT_ERROR: u8 = 2;

/// Injected every N simulated packets
const VIOLATION_EVERY: usize = 25;
const VIOLATION: (f64, f64, f64) = (1.8, 1.9, 0.2);

#[derive(Parser)]
#[command(name = "ternary-guard")]
#[command(version)]
#[command(about = "Streaming signal guard with a tamper-evident audit chain")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the chain (archives + active file) and check every digest
    Verify {
        /// Active chain file (defaults to GUARD_CHAIN_PATH)
        #[arg(long)]
        chain: Option<PathBuf>,
    },
    /// Run a synthetic packet stream through a development pipeline
    Simulate {
        #[arg(long, default_value_t = 200)]
        packets: usize,

        #[arg(long, default_value_t = 7)]
        seed: u64,

        /// Active chain file (defaults to GUARD_CHAIN_PATH)
        #[arg(long)]
        chain: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match GuardConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match cli.command {
        Commands::Verify { chain } => {
            if let Some(path) = chain {
                config.chain.path = path;
            }
            run_verify(&config)
        }
        Commands::Simulate { packets, seed, chain } => {
            if let Some(path) = chain {
                config.chain.path = path;
            }
            match run_simulate(config, packets, seed) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("simulation failed: {:#}", e);
                    ExitCode::from(EXIT_ERROR)
                }
            }
        }
    }
}

// ============================================================================
// VERIFY
// ============================================================================

fn run_verify(config: &GuardConfig) -> ExitCode {
    let keyring = Keyring::from_config(&config.chain);

    match verify_chain(&config.chain.path, &keyring) {
        Ok(result) if result.intact => {
            println!(
                "chain intact: {} record(s) across {} file(s)",
                result.records,
                result.files.len()
            );
            ExitCode::SUCCESS
        }
        Ok(result) => {
            match &result.failure {
                Some(f) => {
                    eprintln!("first corrupted record index: {}", f.index);
                    eprintln!("  {} (file {}, line {})", f.reason, f.file.display(), f.line);
                }
                None => eprintln!("first corrupted record index: {}", result.records),
            }
            ExitCode::from(EXIT_BROKEN)
        }
        Err(e) => {
            eprintln!("cannot read chain {}: {}", config.chain.path.display(), e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

// ============================================================================
// SIMULATE
// ============================================================================

fn run_simulate(config: GuardConfig, packets: usize, seed: u64) -> anyhow::Result<ExitCode> {
    let mut builder = GuardPipeline::builder(config.clone()).demo_seed(seed);
    if let Some(url) = &config.resolution.resolver_url {
        log::info!("Using HTTP resolver at {}", url);
        builder = builder.resolver(Arc::new(HttpResolver::new(url.clone())));
    }
    let pipeline = builder.build()?;

    let mut rng = StdRng::seed_from_u64(seed);
    for i in 1..=packets {
        let (a, b, c) = if i % VIOLATION_EVERY == 0 {
            VIOLATION
        } else {
            (rng.gen_range(0.0..1.2), rng.gen_range(0.0..1.2), rng.gen_range(0.2..1.0))
        };
        let packet = Packet::new(a, b, c)
            .with_context("source", "simulate")
            .with_context("stage", "synthetic");

        pipeline.process_packet(packet);
    }

    let wait = config.resolution.timeout + config.resolution.poll_interval + Duration::from_secs(5);
    if !pipeline.wait_idle(wait) {
        log::warn!("{} escalation(s) still pending", pipeline.pending_escalations());
    }
    pipeline.shutdown(Duration::from_secs(5));

    println!("{}", serde_json::to_string_pretty(&pipeline.metrics())?);

    let result = pipeline.verify()?;
    if result.intact {
        println!("chain intact: {} record(s)", result.records);
        Ok(ExitCode::SUCCESS)
    } else {
        let index = result.failure.as_ref().map(|f| f.index).unwrap_or(result.records);
        eprintln!("first corrupted record index: {}", index);
        Ok(ExitCode::from(EXIT_BROKEN))
    }
}
