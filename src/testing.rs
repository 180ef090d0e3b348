//! In-process gateway fakes shared by unit tests.

use crate::chat::{ChatGateway, ChatMessage};
use crate::egress::{EgressGateway, EgressInfo, EgressRequest, publish_url};
use crate::error::GatewayError;
use crate::model::ChatPlatform;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Map as JsonMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Default)]
pub(crate) struct FakeEgress {
    job_ids: Mutex<VecDeque<String>>,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    hang_next_start: AtomicBool,
    fail_next_stop: AtomicBool,
    fail_status: AtomicBool,
    lose_jobs: AtomicBool,
    ended_status: Mutex<Option<String>>,
}

impl FakeEgress {
    pub(crate) fn with_job_ids<const N: usize>(ids: [&str; N]) -> Self {
        let fake = Self::default();
        fake.job_ids
            .lock()
            .extend(ids.into_iter().map(str::to_owned));
        fake
    }

    /// Starts block until the returned gate is notified.
    pub(crate) fn hold_starts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) async fn wait_for_start_calls(&self, count: usize) {
        while self.started.lock().len() < count {
            tokio::task::yield_now().await;
        }
    }

    pub(crate) fn hang_next_start(&self) {
        self.hang_next_start.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_stop(&self) {
        self.fail_next_stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_status(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    /// The gateway forgets every job it ever started.
    pub(crate) fn lose_jobs(&self) {
        self.lose_jobs.store(true, Ordering::SeqCst);
    }

    /// Every job reports `status` and refuses to stop, like a job that
    /// failed or finished on the gateway side.
    pub(crate) fn end_jobs(&self, status: &str) {
        *self.ended_status.lock() = Some(status.to_string());
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl EgressGateway for FakeEgress {
    async fn start_egress(&self, request: EgressRequest<'_>) -> Result<EgressInfo, GatewayError> {
        let call = {
            let mut started = self.started.lock();
            started.push(format!(
                "{} -> {}",
                request.room_name,
                publish_url(request.rtmp_url, request.stream_key)
            ));
            started.len()
        };

        if self.hang_next_start.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let job_id = self
            .job_ids
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("job-{call}"));
        Ok(EgressInfo {
            job_id,
            room_name: request.room_name.to_string(),
            status: "EGRESS_STARTING".into(),
            started_at: Some(Utc::now()),
            ..Default::default()
        })
    }

    async fn stop_egress(&self, job_id: &str) -> Result<EgressInfo, GatewayError> {
        self.stopped.lock().push(job_id.to_string());
        if self.lose_jobs.load(Ordering::SeqCst) {
            return Err(GatewayError::NotFound(format!("egress {job_id}")));
        }
        if let Some(status) = self.ended_status.lock().clone() {
            return Err(GatewayError::JobEnded(format!(
                "egress with status {status} cannot be stopped"
            )));
        }
        if self.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        Ok(EgressInfo {
            job_id: job_id.to_string(),
            status: "EGRESS_ENDING".into(),
            ended_at: Some(Utc::now()),
            ..Default::default()
        })
    }

    async fn egress_status(&self, job_id: &str) -> Result<EgressInfo, GatewayError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        if self.lose_jobs.load(Ordering::SeqCst) {
            return Err(GatewayError::NotFound(format!("egress {job_id}")));
        }
        if let Some(status) = self.ended_status.lock().clone() {
            return Ok(EgressInfo {
                job_id: job_id.to_string(),
                status,
                ended_at: Some(Utc::now()),
                ..Default::default()
            });
        }
        Ok(EgressInfo {
            job_id: job_id.to_string(),
            status: "EGRESS_ACTIVE".into(),
            started_at: Some(Utc::now()),
            ..Default::default()
        })
    }
}

/// Chat gateway that returns every message pushed so far on each fetch,
/// like a platform returning overlapping windows.
pub(crate) struct FakeChat {
    platform: ChatPlatform,
    messages: Mutex<Vec<ChatMessage>>,
    calls: AtomicUsize,
    fail_next: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) entered: Notify,
}

impl FakeChat {
    pub(crate) fn new(platform: ChatPlatform) -> Self {
        Self {
            platform,
            messages: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            gate: Mutex::new(None),
            entered: Notify::new(),
        }
    }

    pub(crate) fn push(&self, external_id: &str) {
        self.messages.lock().push(ChatMessage {
            external_id: external_id.to_string(),
            author_name: "viewer".into(),
            author_avatar: None,
            text: format!("message {external_id}"),
            published_at: Utc::now(),
            metadata: JsonMap::new(),
        });
    }

    pub(crate) fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Fetches block until the returned gate is notified.
    pub(crate) fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatGateway for FakeChat {
    fn platform(&self) -> ChatPlatform {
        self.platform
    }

    async fn fetch_messages(
        &self,
        _access_token: &str,
        _channel_id: &str,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 503,
                message: "backend unavailable".into(),
            });
        }
        Ok(self.messages.lock().clone())
    }
}
