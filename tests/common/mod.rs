//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use dynapi::config::AppConfig;
use dynapi::lifecycle::{Engine, Shutdown};
use dynapi::store::MemoryStore;

pub const ADMIN_KEY: &str = "test-admin-key";

/// A server running on ephemeral ports.
pub struct TestApp {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub shutdown: Shutdown,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr, path)
    }

    pub async fn get_status(&self, path: &str) -> u16 {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("server unreachable")
            .status()
            .as_u16()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.admin.bind_address = "127.0.0.1:0".into();
    config.reload.reconnect_base_delay_ms = 10;
    config.reload.reconnect_max_delay_ms = 100;
    config
}

/// Boot the engine, the CRUD listener and the admin listener.
pub async fn spawn_app(config: AppConfig) -> TestApp {
    spawn_app_with_store(config, Arc::new(MemoryStore::default())).await
}

pub async fn spawn_app_with_store(config: AppConfig, store: Arc<MemoryStore>) -> TestApp {
    let shutdown = Shutdown::new();
    let engine = Engine::start_with_store(&config, store.clone(), &shutdown)
        .await
        .expect("engine failed to start");

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = engine.http_server(&config);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    let admin_listener = TcpListener::bind(&config.admin.bind_address).await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    let admin = engine.admin_router(&config);
    let mut admin_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = axum::serve(admin_listener, admin)
            .with_graceful_shutdown(async move {
                let _ = admin_shutdown.recv().await;
            })
            .await;
    });

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    TestApp {
        addr,
        admin_addr,
        engine,
        store,
        shutdown,
        client,
    }
}

/// Poll `check` until it holds, panicking after `timeout`.
pub async fn wait_until<F, Fut>(timeout: Duration, what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until `path` answers GET with `status`.
pub async fn wait_for_status(app: &TestApp, path: &str, status: u16) {
    let what = format!("GET {} -> {}", path, status);
    wait_until(Duration::from_secs(5), &what, move || async move {
        app.get_status(path).await == status
    })
    .await;
}
