use std::sync::Arc;

use chrono::Utc;
use fleet_core::{FleetError, PoolStats, SessionConfig};
use fleet_pool::{PoolConfig, SessionPool, TokioSpawnerFactory};
use fleet_process::ProcessConfig;

fn sleepy(secs: u64) -> ProcessConfig {
    let mut cfg = ProcessConfig::new("sleep");
    cfg.args = vec![secs.to_string()];
    cfg
}

fn session_cfg(dir: &str, tools: &[&str]) -> SessionConfig {
    let mut cfg = SessionConfig::new(dir, "prompt");
    cfg.allowed_tools = tools.iter().map(|s| (*s).to_string()).collect();
    cfg
}

fn small_pool(max_sessions: u32) -> SessionPool {
    let config = PoolConfig {
        max_sessions,
        ..PoolConfig::default()
    };
    SessionPool::new(config, Arc::new(TokioSpawnerFactory))
}

/// Scenario S5: acquire, release, re-acquire with a tool-order-permuted
/// but otherwise identical config reuses the same session.
#[tokio::test]
async fn scenario_s5_session_reuse() {
    let pool = small_pool(10);
    let now = Utc::now();
    let cfg_a = session_cfg("/w", &["a", "b"]);
    let cfg_b = session_cfg("/w", &["b", "a"]);

    let id1 = pool.acquire_session(now, &cfg_a, sleepy(30)).await.unwrap();
    pool.release_session(&id1, now).await.unwrap();
    let id2 = pool.acquire_session(now, &cfg_b, sleepy(30)).await.unwrap();

    assert_eq!(id1, id2);
    let stats = pool.stats().await;
    assert_eq!(stats.total, 1);

    pool.remove_session(&id1).await.unwrap();
}

#[tokio::test]
async fn pool_exhausted_when_all_sessions_active() {
    let pool = small_pool(1);
    let now = Utc::now();
    let cfg = session_cfg("/w", &[]);
    let id = pool.acquire_session(now, &cfg, sleepy(30)).await.unwrap();

    let err = pool.acquire_session(now, &cfg, sleepy(30)).await.unwrap_err();
    assert_eq!(err, FleetError::PoolExhausted);

    pool.remove_session(&id).await.unwrap();
}

#[tokio::test]
async fn capacity_evicts_oldest_idle_before_spawning() {
    let pool = small_pool(1);
    let now = Utc::now();
    let cfg_a = session_cfg("/w-a", &[]);
    let cfg_b = session_cfg("/w-b", &[]);

    let id1 = pool.acquire_session(now, &cfg_a, sleepy(30)).await.unwrap();
    pool.release_session(&id1, now).await.unwrap();

    let later = now + chrono::Duration::seconds(5);
    let id2 = pool.acquire_session(later, &cfg_b, sleepy(30)).await.unwrap();

    assert_ne!(id1, id2);
    let stats = pool.stats().await;
    assert_eq!(stats.total, 1);

    pool.remove_session(&id2).await.unwrap();
}

#[tokio::test]
async fn release_unknown_session_fails() {
    let pool = small_pool(10);
    let err = pool.release_session(&"ghost".to_string(), Utc::now()).await.unwrap_err();
    assert_eq!(err, FleetError::UnknownSession("ghost".to_string()));
}

#[tokio::test]
async fn release_idle_session_fails_not_in_use() {
    let pool = small_pool(10);
    let now = Utc::now();
    let cfg = session_cfg("/w", &[]);
    let id = pool.acquire_session(now, &cfg, sleepy(30)).await.unwrap();
    pool.release_session(&id, now).await.unwrap();

    let err = pool.release_session(&id, now).await.unwrap_err();
    assert_eq!(err, FleetError::NotInUse(id.clone()));

    pool.remove_session(&id).await.unwrap();
}

#[tokio::test]
async fn reaper_closes_idle_past_max_idle_time() {
    let mut config = PoolConfig::default();
    config.max_idle_time = std::time::Duration::from_secs(60);
    let pool = SessionPool::new(config, Arc::new(TokioSpawnerFactory));
    let now = Utc::now();
    let cfg = session_cfg("/w", &[]);
    let id = pool.acquire_session(now, &cfg, sleepy(30)).await.unwrap();
    pool.release_session(&id, now).await.unwrap();

    let later = now + chrono::Duration::seconds(120);
    let reaped = pool.reap(later).await;
    assert_eq!(reaped, vec![id]);
    assert_eq!(pool.stats().await, PoolStats { total: 0, active: 0, idle: 0, max_capacity: 10 });
}

#[tokio::test]
async fn reaper_never_removes_active_sessions() {
    let mut config = PoolConfig::default();
    config.max_idle_time = std::time::Duration::from_secs(0);
    let pool = SessionPool::new(config, Arc::new(TokioSpawnerFactory));
    let now = Utc::now();
    let cfg = session_cfg("/w", &[]);
    let id = pool.acquire_session(now, &cfg, sleepy(30)).await.unwrap();

    let reaped = pool.reap(now + chrono::Duration::seconds(1)).await;
    assert!(reaped.is_empty());

    pool.remove_session(&id).await.unwrap();
}
