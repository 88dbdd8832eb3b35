//! End-to-end checks of the engine on the contracts and requests that an
//! editor session would typically produce.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use aurion_engine::{
    complete::{CompletionConfig, FileContext, LocalCompletion},
    config::EngineConfig,
    issue::Severity,
    simulate::ChainDescriptor,
    source::SourceFile,
    testgen::TestKind,
    verify::{Property, VerificationResult},
    EngineBuilder,
    StageStatus,
};
use aurion_errors::location::Location;

const VESTING: &str = include_str!("data/vesting.aur");

const WITHDRAW: &str = "contract Bank {
  balances: map<address, u64>

  deposit() {
    self.balances[msg.sender] += msg.value
  }

  withdraw(amount: u64) {
    require(self.balances[msg.sender] >= amount)
    transfer(msg.sender, amount)
    self.balances[msg.sender] -= amount
  }
}";

#[test]
fn vesting_is_clean_and_verified() -> anyhow::Result<()> {
    let engine = EngineBuilder::new().build()?;
    let report = engine.analyze(&SourceFile::new("vesting.aur", VESTING));

    assert!(report.is_complete(), "{:?}", report.stages);
    assert!(report.issues.is_empty(), "{:?}", report.issues);

    let bound = report
        .verification
        .iter()
        .find(|r| matches!(r.property().property, Property::FieldBoundedBy { .. }))
        .ok_or_else(|| anyhow::anyhow!("no bound was inferred"))?;
    assert!(matches!(bound, VerificationResult::Verified { .. }));

    assert!(report.assessment.passed);
    assert_eq!(report.assessment.security_score, 100);
    let gas = report.gas.as_ref().ok_or_else(|| anyhow::anyhow!("no gas report"))?;
    assert!(gas.functions.contains_key("SimpleVesting.calculate_vested"));

    Ok(())
}

#[test]
fn withdraw_reports_one_reentrancy() -> anyhow::Result<()> {
    let engine = EngineBuilder::new().build()?;
    let report = engine.analyze(&SourceFile::new("bank.aur", WITHDRAW));

    let high = report
        .issues
        .iter()
        .filter(|i| i.severity == Severity::High)
        .collect::<Vec<_>>();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].id, "reentrancy");
    assert_eq!(high[0].function.as_deref(), Some("withdraw"));

    let suite = engine.generate_tests(&SourceFile::new("bank.aur", WITHDRAW))?;
    assert!(suite.value.tests.iter().any(|t| t.kind == TestKind::ReentrancyProbe));

    Ok(())
}

#[test]
fn repeated_analyses_agree() -> anyhow::Result<()> {
    let engine = EngineBuilder::new().build()?;
    let file = SourceFile::new("bank.aur", WITHDRAW);

    assert_eq!(engine.analyze(&file), engine.analyze(&file));

    Ok(())
}

#[test]
fn unreachable_completion_backends_yield_nothing() -> anyhow::Result<()> {
    let config = EngineConfig {
        completion: CompletionConfig {
            endpoint:   Some("http://127.0.0.1:9/complete".to_string()),
            api_key:    None,
            timeout_ms: 500,
        },
        ..EngineConfig::default()
    };
    let engine = EngineBuilder::new().with_config(config).build()?;
    let context = FileContext::new("vesting.aur", VESTING).with_cursor(Location::new(20, 5));

    let started = Instant::now();
    assert!(engine.complete(&context).is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));

    Ok(())
}

#[test]
fn local_completion_is_the_default() -> anyhow::Result<()> {
    let engine = EngineBuilder::new()
        .with_completion(Arc::new(LocalCompletion::new()))
        .build()?;
    let source = "contract A {\n  x: u64\n\n  f() {\n    self.\n  }\n}";
    let context = FileContext::new("a.aur", source).with_cursor(Location::new(5, 10));

    let suggestions = engine.complete(&context);
    assert!(suggestions.iter().any(|s| s.snippet.contains('x')));
    assert!(suggestions.iter().all(|s| (0.0..=1.0).contains(&s.score)));

    Ok(())
}

#[test]
fn simulation_of_no_chains_is_empty() -> anyhow::Result<()> {
    let engine = EngineBuilder::new().build()?;
    let file = SourceFile::new("vesting.aur", VESTING);

    assert!(engine.simulate(&file, &[])?.value.is_empty());

    let results = engine.simulate(&file, &[ChainDescriptor::new("Aurlink VM", "")])?;
    assert!(results.is_complete());
    assert!(results.value["Aurlink VM"].passed);

    Ok(())
}

#[test]
fn requests_on_broken_files_fail_with_diagnostics() -> anyhow::Result<()> {
    let engine = EngineBuilder::new().build()?;
    let file = SourceFile::new("broken.aur", "contract A {\n  x: u65\n}");

    assert!(matches!(engine.lower(&file), Err(aurion_errors::Error::Syntax(_))));
    assert!(engine.simulate(&file, &[]).is_err());

    let report = engine.analyze(&file);
    assert_eq!(report.diagnostics.len(), 1);
    assert!(matches!(report.stages[0].status, StageStatus::Degraded(_)));

    Ok(())
}
