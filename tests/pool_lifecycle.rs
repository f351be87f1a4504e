// End-to-end scenarios from spec §8, exercised against a real `Pool` with
// the hypervisor/image/credential layers replaced by in-memory doubles.

mod common;

use common::{KillSwitchHypervisor, NullCredentialIssuer, NullImageStore};
use fireactions::config::PoolConfig;
use fireactions::pool::Pool;
use fireactions::types::PoolState;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn pool_config(name: &str, min: u32, max: u32) -> PoolConfig {
    PoolConfig {
        name: name.to_string(),
        min_runners: min,
        max_runners: max,
        ..PoolConfig::default()
    }
}

async fn spawn_pool(dir: &TempDir, config: PoolConfig, hypervisor: Arc<KillSwitchHypervisor>) -> Arc<Pool> {
    Pool::new(
        config,
        dir.path(),
        Arc::new(NullImageStore),
        Arc::new(NullCredentialIssuer),
        hypervisor,
    )
    .await
    .unwrap()
}

/// Scenario 1: cold-start reaches min within a handful of ticks.
#[tokio::test]
async fn cold_start_reaches_min() {
    let dir = TempDir::new().unwrap();
    let hypervisor = KillSwitchHypervisor::new();
    let pool = spawn_pool(&dir, pool_config("p", 2, 5), hypervisor).await;
    pool.start();

    tokio::time::sleep(Duration::from_millis(3_300)).await;

    let status = pool.status();
    assert_eq!(status.cur_runners, 2);
    assert_eq!(status.state, PoolState::Active);

    pool.stop().await;
}

/// Scenario 2: pausing stops refill after an out-of-band VM death; resuming
/// restores it.
#[tokio::test]
async fn pause_suppresses_refill_until_resumed() {
    let dir = TempDir::new().unwrap();
    let hypervisor = KillSwitchHypervisor::new();
    let pool = spawn_pool(&dir, pool_config("p", 2, 5), hypervisor.clone()).await;
    pool.start();

    tokio::time::sleep(Duration::from_millis(2_300)).await;
    assert_eq!(pool.current_size(), 2);

    pool.pause();

    let victim = pool.status().runners[0].name.clone();
    hypervisor.kill(&victim);

    // Give the reaper a moment to deregister, then confirm several ticks
    // pass without the pool refilling itself.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pool.current_size(), 1);

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(pool.current_size(), 1, "paused pool must not self-heal");

    pool.resume();
    tokio::time::sleep(Duration::from_millis(3_300)).await;
    assert_eq!(pool.current_size(), 2);

    pool.stop().await;
}

/// Scenario 4: explicit scale-up is clamped at max_runners.
#[tokio::test]
async fn scale_above_max_is_clamped() {
    let dir = TempDir::new().unwrap();
    let hypervisor = KillSwitchHypervisor::new();
    let pool = spawn_pool(&dir, pool_config("p", 0, 3), hypervisor).await;
    pool.start();

    pool.scale(3).await.unwrap();
    assert_eq!(pool.current_size(), 3);

    pool.scale(1).await.unwrap();
    assert_eq!(pool.current_size(), 3, "scale must not exceed max_runners");

    pool.stop().await;
}

/// Invariant: reload with an unchanged pool name preserves current_size (no
/// VM churn) since `replace_config` never touches the machine registry.
#[tokio::test]
async fn replace_config_does_not_churn_running_vms() {
    let dir = TempDir::new().unwrap();
    let hypervisor = KillSwitchHypervisor::new();
    let pool = spawn_pool(&dir, pool_config("p", 1, 2), hypervisor).await;
    pool.start();

    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert_eq!(pool.current_size(), 1);
    let runner_name_before = pool.status().runners[0].name.clone();

    pool.replace_config(pool_config("p", 2, 2));
    tokio::time::sleep(Duration::from_millis(2_300)).await;

    assert_eq!(pool.current_size(), 2);
    let names_after: Vec<String> = pool.status().runners.iter().map(|r| r.name.clone()).collect();
    assert!(names_after.contains(&runner_name_before), "pre-existing runner must survive a reload");

    pool.stop().await;
}
