//! Tests for the harvest command

use telegram_harvester::commands::HarvestOptions;
use telegram_harvester::Config;

#[test]
fn test_harvest_defaults_run_both_strategies_for_large_groups() {
    let options = HarvestOptions::default();
    let discovery = options.discovery(&Config::with_defaults());

    let strategies = discovery.policy.strategies(discovery.policy.large_group_threshold + 1);
    assert!(strategies.search);
    assert!(strategies.paging);
}

#[test]
fn test_harvest_large_group_only_skips_small_groups() {
    let options = HarvestOptions {
        large_group_only: true,
        ..Default::default()
    };
    let discovery = options.discovery(&Config::with_defaults());

    assert!(!discovery.policy.strategies(100).any());
}

#[test]
fn test_harvest_driver_override() {
    let options = HarvestOptions {
        driver: Some("memory".into()),
        ..Default::default()
    };

    assert_eq!(options.apply(Config::with_defaults()).db_driver, "memory");
}

#[tokio::test]
#[ignore] // Requires Telegram credentials and an interactive login
async fn test_harvest_run_against_live_account() {
    let options = HarvestOptions {
        driver: Some("memory".into()),
        chat_limit: Some(5),
        ..Default::default()
    };

    let result = telegram_harvester::commands::harvest_run(Config::new(), options).await;
    assert!(result.is_ok());
}
