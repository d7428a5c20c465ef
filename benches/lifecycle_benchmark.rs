use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use installment_engine::core::config::EngineConfig;
use installment_engine::loan::model::LoanRequest;
use installment_engine::prelude::*;
use installment_engine::simulation::portfolio::{run_portfolio, PortfolioConfig};
use std::sync::Arc;

fn funded_manager() -> LoanManager {
    let ledger = Arc::new(InMemoryTokenLedger::new());
    ledger.mint(&AccountId::new("lp"), 1_000_000);
    ledger.mint(&AccountId::new("alice"), 1_000_000);
    let manager = LoanManager::new(
        EngineConfig::default(),
        ledger,
        Arc::new(ManualClock::at_epoch(1_700_000_000)),
        Arc::new(RecordingSink::new()),
    )
    .unwrap();
    manager
        .add_liquidity(&AccountId::new("lp"), 1_000_000)
        .unwrap();
    manager
}

fn bench_single_lifecycle(c: &mut Criterion) {
    c.bench_function("lifecycle_12_installments", |b| {
        b.iter_batched(
            funded_manager,
            |manager| {
                let id = manager
                    .create_loan_with_terms(LoanRequest {
                        borrower: AccountId::new("alice"),
                        merchant: AccountId::new("shop"),
                        principal: black_box(1_200),
                        term_months: 12,
                        interest_rate_bps: 1_200,
                        deposit_amount: 200,
                    })
                    .unwrap();
                manager.process_deposit(id).unwrap();
                for n in 1..=12 {
                    manager.process_installment(id, n).unwrap();
                }
                manager
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_portfolio(c: &mut Criterion, borrowers: usize) {
    let config = PortfolioConfig {
        borrowers,
        liquidity_per_provider: 1_000_000,
        seed: Some(7),
        ..Default::default()
    };

    c.bench_function(&format!("portfolio_{}_borrowers", borrowers), |b| {
        b.iter(|| run_portfolio(black_box(&config), EngineConfig::default()).unwrap())
    });
}

fn bench_portfolio_50(c: &mut Criterion) {
    bench_portfolio(c, 50);
}

fn bench_portfolio_500(c: &mut Criterion) {
    bench_portfolio(c, 500);
}

criterion_group!(
    benches,
    bench_single_lifecycle,
    bench_portfolio_50,
    bench_portfolio_500
);
criterion_main!(benches);
