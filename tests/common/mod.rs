#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use concept_mastery_service::config::Config;
use concept_mastery_service::db::MasteryStore;
use concept_mastery_service::mastery::FixedClock;
use concept_mastery_service::services::event_source::{
    EventSourceClient, EventTransport, RetryPolicy, TransportError, TransportResponse,
};
use concept_mastery_service::services::recompute::RecomputeMode;
use concept_mastery_service::state::AppState;

/// One scripted upstream reply.
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    Json(Value),
    Raw(u16, &'static str),
    Refused,
    Hang(Duration),
}

/// Replays `Step`s in order; once exhausted, keeps repeating the last one.
#[derive(Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = steps.pop_front() {
            *last = Some(step.clone());
            return step;
        }
        last.clone().unwrap_or(Step::Status(503))
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        match self.next_step() {
            Step::Status(status) => Ok(TransportResponse {
                status,
                body: Bytes::from_static(b"upstream error"),
            }),
            Step::Json(value) => Ok(TransportResponse {
                status: 200,
                body: Bytes::from(serde_json::to_vec(&value).unwrap()),
            }),
            Step::Raw(status, body) => Ok(TransportResponse {
                status,
                body: Bytes::from_static(body.as_bytes()),
            }),
            Step::Refused => Err(TransportError::Connect("connection refused".into())),
            Step::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok(TransportResponse {
                    status: 200,
                    body: Bytes::from_static(b"[]"),
                })
            }
        }
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        backoff_factor: 2.0,
        attempt_timeout: Duration::from_millis(200),
        ..RetryPolicy::default()
    }
}

pub fn fixed_clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap())
}

pub fn client(transport: Arc<ScriptedTransport>) -> EventSourceClient {
    EventSourceClient::new("http://events.test", fast_policy(), transport)
}

pub fn test_config(mode: RecomputeMode) -> Config {
    let mut config = Config::from_env();
    config.recompute_mode = mode;
    config.retry = fast_policy();
    config
}

pub async fn create_test_state(
    transport: Arc<ScriptedTransport>,
    mode: RecomputeMode,
) -> (AppState, MasteryStore) {
    let store = MasteryStore::in_memory().await.expect("in-memory store");
    let state = concept_mastery_service::build_state(
        store.clone(),
        client(transport),
        Arc::new(fixed_clock()),
        &test_config(mode),
    );
    (state, store)
}
