//! installment-engine CLI
//!
//! Price loans and run simulated portfolios from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Quote a loan for a given credit score
//! installment-engine quote --score 720 --term 12 --principal 1500
//!
//! # Output as JSON
//! installment-engine quote --score 720 --term 12 --principal 1500 --format json
//!
//! # Run a random portfolio through the engine
//! installment-engine simulate --borrowers 200 --seed 7
//! ```

use chrono::{DateTime, Utc};
use installment_engine::core::account::AccountId;
use installment_engine::core::config::EngineConfig;
use installment_engine::core::{bps_to_percent, Amount, BPS_DENOMINATOR};
use installment_engine::credit::eligibility::{calculate_interest_rate, verify_eligibility};
use installment_engine::credit::profile::{CreditProfile, MAX_SCORE, MIN_SCORE};
use installment_engine::loan::schedule::{build_schedule, compute_terms};
use installment_engine::simulation::portfolio::{run_portfolio, PortfolioConfig};
use std::process;

fn print_usage() {
    eprintln!(
        r#"installment-engine: buy-now-pay-later lending engine

USAGE:
    installment-engine <COMMAND> [OPTIONS]

COMMANDS:
    quote       Show eligibility, pricing and schedule for a loan
    simulate    Run a random loan portfolio through the engine
    help        Show this message

OPTIONS (all):
    --config <FILE>     JSON file overriding engine parameters
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (quote):
    --score <N>         Borrower credit score, 300-850 (default: 650)
    --term <N>          Term in months (default: 12)
    --principal <N>     Purchase amount (default: 1000)
    --deposit-bps <N>   Deposit in basis points of principal (default: 0)

OPTIONS (simulate):
    --borrowers <N>     Number of borrowers (default: 50)
    --providers <N>     Number of liquidity providers (default: 3)
    --liquidity <N>     Liquidity per provider (default: 50000)
    --seed <N>          Fixed random seed

EXAMPLES:
    installment-engine quote --score 780 --term 6 --principal 2000 --deposit-bps 1000
    installment-engine simulate --borrowers 500 --liquidity 200000 --format json
    installment-engine simulate --config engine.json --seed 42"#
    );
}

#[derive(serde::Serialize)]
struct QuoteOutput {
    score: u16,
    eligible: bool,
    reason: String,
    max_amount: String,
    principal: String,
    deposit: String,
    term_months: u32,
    interest_rate_bps: u32,
    interest_rate_percent: String,
    total_interest: String,
    total_amount: String,
    monthly_amount: String,
    installments: Vec<InstallmentOutput>,
}

#[derive(serde::Serialize)]
struct InstallmentOutput {
    number: u32,
    due_at: DateTime<Utc>,
    amount: String,
}

fn next_value<'a>(args: &'a [String], i: usize, flag: &str, what: &str) -> &'a str {
    args.get(i).map(|s| s.as_str()).unwrap_or_else(|| {
        eprintln!("{} requires {}", flag, what);
        process::exit(1);
    })
}

fn parse_number<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    next_value(args, i, flag, "a number")
        .parse()
        .unwrap_or_else(|_| {
            eprintln!("{} requires a number", flag);
            process::exit(1);
        })
}

fn load_config(path: Option<&str>) -> EngineConfig {
    match path {
        Some(path) => EngineConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }),
        None => EngineConfig::default(),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing output: {}", e);
        process::exit(1);
    })
}

fn cmd_quote(args: &[String]) {
    let mut score: u16 = 650;
    let mut term: u32 = 12;
    let mut principal: Amount = 1_000;
    let mut deposit_bps: u32 = 0;
    let mut config_path: Option<String> = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--score" => {
                i += 1;
                score = parse_number(args, i, "--score");
            }
            "--term" => {
                i += 1;
                term = parse_number(args, i, "--term");
            }
            "--principal" => {
                i += 1;
                principal = parse_number(args, i, "--principal");
            }
            "--deposit-bps" => {
                i += 1;
                deposit_bps = parse_number(args, i, "--deposit-bps");
            }
            "--config" => {
                i += 1;
                config_path = Some(next_value(args, i, "--config", "a file path").to_string());
            }
            "--format" => {
                i += 1;
                format = next_value(args, i, "--format", "'text' or 'json'").to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        eprintln!("Error: --score must be between {} and {}", MIN_SCORE, MAX_SCORE);
        process::exit(1);
    }
    let config = load_config(config_path.as_deref());
    if term < config.min_term_months || term > config.max_term_months {
        eprintln!(
            "Error: --term must be between {} and {}",
            config.min_term_months, config.max_term_months
        );
        process::exit(1);
    }
    if deposit_bps > config.max_deposit_bps {
        eprintln!("Error: --deposit-bps may not exceed {}", config.max_deposit_bps);
        process::exit(1);
    }

    let now = Utc::now();
    let mut profile = CreditProfile::new(AccountId::new("quote"), now);
    profile.credit_score = score;
    let eligibility = verify_eligibility(&profile, config.credit_base_unit);
    let rate = calculate_interest_rate(score, term);
    let deposit = principal * deposit_bps as u128 / BPS_DENOMINATOR;
    let terms = compute_terms(principal, deposit, term, rate);
    let schedule = build_schedule(now, config.installment_interval_days, term, terms.financed_amount());

    if format == "json" {
        let output = QuoteOutput {
            score,
            eligible: eligibility.eligible && principal <= eligibility.max_amount,
            reason: eligibility.reason.clone(),
            max_amount: eligibility.max_amount.to_string(),
            principal: principal.to_string(),
            deposit: deposit.to_string(),
            term_months: term,
            interest_rate_bps: rate,
            interest_rate_percent: bps_to_percent(rate as u128).to_string(),
            total_interest: terms.total_interest.to_string(),
            total_amount: terms.total_amount.to_string(),
            monthly_amount: terms.monthly_amount.to_string(),
            installments: schedule
                .iter()
                .map(|inst| InstallmentOutput {
                    number: inst.number,
                    due_at: inst.due_at,
                    amount: inst.amount.to_string(),
                })
                .collect(),
        };
        println!("{}", to_json(&output));
    } else {
        println!("=== Loan Quote ===");
        println!("Credit Score:        {}", score);
        println!("Eligibility:         {}", eligibility.reason);
        println!("Credit Limit:        {}", eligibility.max_amount);
        if eligibility.eligible && principal > eligibility.max_amount {
            println!("  (principal {} exceeds the limit)", principal);
        }
        println!("Principal:           {}", principal);
        println!("Deposit:             {}", deposit);
        println!("Term:                {} months", term);
        println!("Interest Rate:       {}%", bps_to_percent(rate as u128));
        println!("Total Interest:      {}", terms.total_interest);
        println!("Total Amount:        {}", terms.total_amount);
        println!("Monthly Payment:     {}", terms.monthly_amount);
        println!();
        println!("Schedule:");
        for inst in &schedule {
            println!(
                "  #{:<3} {}  {}",
                inst.number,
                inst.due_at.format("%Y-%m-%d"),
                inst.amount
            );
        }
    }
}

fn cmd_simulate(args: &[String]) {
    let mut portfolio = PortfolioConfig::default();
    let mut config_path: Option<String> = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--borrowers" => {
                i += 1;
                portfolio.borrowers = parse_number(args, i, "--borrowers");
            }
            "--providers" => {
                i += 1;
                portfolio.providers = parse_number(args, i, "--providers");
            }
            "--liquidity" => {
                i += 1;
                portfolio.liquidity_per_provider = parse_number(args, i, "--liquidity");
            }
            "--seed" => {
                i += 1;
                portfolio.seed = Some(parse_number(args, i, "--seed"));
            }
            "--config" => {
                i += 1;
                config_path = Some(next_value(args, i, "--config", "a file path").to_string());
            }
            "--format" => {
                i += 1;
                format = next_value(args, i, "--format", "'text' or 'json'").to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let config = load_config(config_path.as_deref());
    let report = run_portfolio(&portfolio, config).unwrap_or_else(|e| {
        eprintln!("Simulation failed: {}", e);
        process::exit(1);
    });

    if format == "json" {
        println!("{}", to_json(&report));
    } else {
        println!("{}", report);
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "quote" => cmd_quote(rest),
        "simulate" => cmd_simulate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
