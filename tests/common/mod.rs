#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::Instant;

use coventure::app::App;
use coventure::backend::{Backend, Channel, Filter, LocalBackend};
use coventure::config::{ClientConfig, ENV_API_KEY, ENV_BACKEND_URL, ENV_SESSION_FILE};
use coventure::error::{Error, Result};
use coventure::session::Session;
use coventure::types::{ChannelFilter, ChannelMessage, ChannelStatus, Table};
use coventure::view::Notice;

/// Holds back one query until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub reached: Notify,
    pub release: Notify,
}

/// A local backend that counts requests and can be told to fail writes or
/// hold a query.
pub struct TestBackend {
    pub local: LocalBackend,
    requests: AtomicUsize,
    fail_writes: AtomicBool,
    fail_next: Mutex<HashMap<Table, usize>>,
    gates: Mutex<HashMap<Table, Arc<Gate>>>,
}

impl TestBackend {
    pub fn new() -> Arc<Self> {
        let local = LocalBackend::in_memory().expect("open in-memory backend");
        local.initialize().expect("create schema");
        Arc::new(Self {
            local,
            requests: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            fail_next: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fails the next `count` writes to `table`.
    pub fn fail_next_writes(&self, table: Table, count: usize) {
        self.fail_next.lock().unwrap().insert(table, count);
    }

    /// Parks the next query on `table` until `release` is notified.
    pub fn gate_next_query(&self, table: Table) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap().insert(table, gate.clone());
        gate
    }

    fn check_write(&self, table: Table) -> Result<()> {
        let scripted = {
            let mut fail_next = self.fail_next.lock().unwrap();
            match fail_next.get_mut(&table) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if scripted || self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Backend {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for TestBackend {
    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().remove(&table);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        self.local.query(table, filter).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.check_write(table)?;
        self.local.insert(table, row).await
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.check_write(table)?;
        self.local.update(table, id, patch).await
    }

    async fn open_channel(&self, filter: &ChannelFilter) -> Result<Channel> {
        self.local.open_channel(filter).await
    }
}

/// What the next `open_channel` call does.
#[derive(Debug, Clone, Copy)]
pub enum OpenStep {
    Refuse,
    Subscribe,
    /// Opens, then reports a join failure.
    Reject,
}

/// A backend whose realtime side follows a script and records when each
/// channel was opened. Data calls are refused.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<OpenStep>>,
    opens: Mutex<Vec<Instant>>,
    live: Mutex<Vec<mpsc::Sender<ChannelMessage>>>,
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = OpenStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            opens: Mutex::new(Vec::new()),
            live: Mutex::new(Vec::new()),
        })
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }

    /// Milliseconds between `start` and each open.
    pub fn open_offsets(&self, start: Instant) -> Vec<u128> {
        self.opens()
            .into_iter()
            .map(|at| (at - start).as_millis())
            .collect()
    }

    /// Pushes a message into the most recently opened channel.
    pub async fn push(&self, msg: ChannelMessage) {
        let tx = self.live.lock().unwrap().last().cloned().expect("no live channel");
        tx.send(msg).await.expect("channel closed");
    }

    /// Drops every open channel's sender, as if the transport went away.
    pub fn drop_channels(&self) {
        self.live.lock().unwrap().clear();
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn query(&self, _table: Table, _filter: &Filter) -> Result<Vec<Value>> {
        Err(Error::Realtime("scripted backend has no data".to_string()))
    }

    async fn insert(&self, _table: Table, _row: Value) -> Result<Value> {
        Err(Error::Realtime("scripted backend has no data".to_string()))
    }

    async fn update(&self, _table: Table, _id: &str, _patch: Value) -> Result<Value> {
        Err(Error::Realtime("scripted backend has no data".to_string()))
    }

    async fn open_channel(&self, _filter: &ChannelFilter) -> Result<Channel> {
        self.opens.lock().unwrap().push(Instant::now());
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenStep::Refuse);
        match step {
            OpenStep::Refuse => Err(Error::Realtime("connection refused".to_string())),
            OpenStep::Subscribe | OpenStep::Reject => {
                let (tx, channel) = Channel::pair(16);
                let status = match step {
                    OpenStep::Subscribe => ChannelStatus::Subscribed,
                    _ => ChannelStatus::ChannelError("join rejected".to_string()),
                };
                tx.send(ChannelMessage::Status(status))
                    .await
                    .expect("fresh channel");
                self.live.lock().unwrap().push(tx);
                Ok(channel)
            }
        }
    }
}

pub fn test_config(session_dir: &Path) -> ClientConfig {
    config_for_url(session_dir, "http://127.0.0.1:9")
}

pub fn config_for_url(session_dir: &Path, backend_url: &str) -> ClientConfig {
    let session_file = session_dir.join("session.toml");
    ClientConfig::load_with(None, |key| match key {
        ENV_BACKEND_URL => Some(backend_url.to_string()),
        ENV_API_KEY => Some("test-anon-key".to_string()),
        ENV_SESSION_FILE => Some(session_file.to_string_lossy().to_string()),
        _ => None,
    })
    .expect("test config")
}

pub fn session_for(user_id: &str) -> Session {
    Session {
        user_id: user_id.to_string(),
        access_token: format!("token-{user_id}"),
        refresh_token: None,
        expires_at: None,
    }
}

/// An app signed in as `user_id` against `backend`.
pub fn app_for(backend: Arc<dyn Backend>, session_dir: &Path, user_id: &str) -> App {
    App::with_backend(test_config(session_dir), backend, Some(session_for(user_id)))
}

/// Inserts a profile row directly, bypassing the views.
pub async fn seed_profile(backend: &TestBackend, user_id: &str, name: &str) {
    backend
        .local
        .insert(
            Table::Profiles,
            json!({
                "id": user_id,
                "full_name": name,
                "onboarding_completed": true,
                "created_at": Utc::now(),
                "updated_at": Utc::now(),
            }),
        )
        .await
        .expect("seed profile");
}

/// Receives notices until one matches or two seconds pass.
pub async fn expect_notice<F>(rx: &mut broadcast::Receiver<Notice>, matches: F) -> Notice
where
    F: Fn(&Notice) -> bool,
{
    expect_notice_within(rx, Duration::from_secs(2), matches).await
}

/// Like [`expect_notice`] with a caller-chosen wait, for paused-clock tests.
pub async fn expect_notice_within<F>(
    rx: &mut broadcast::Receiver<Notice>,
    within: Duration,
    matches: F,
) -> Notice
where
    F: Fn(&Notice) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(notice) if matches(&notice) => return notice,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("notice stream closed"),
            }
        }
    };
    tokio::time::timeout(within, wait)
        .await
        .expect("timed out waiting for notice")
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
