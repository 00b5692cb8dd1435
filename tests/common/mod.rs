//! Scripted in-process transport for executor tests.

#![allow(dead_code)]

use async_trait::async_trait;
use callguard::transport::{HttpCall, TransportError, WireRequest, WireResponse};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Step {
    Respond(WireResponse),
    Fail(TransportError),
    /// Never answers (within any sane timeout).
    Hang,
}

impl Step {
    pub fn json(status: u16, body: Value) -> Self {
        Step::Respond(WireResponse::json(status, &body))
    }

    pub fn status(status: u16) -> Self {
        Step::Respond(WireResponse::new(status, ""))
    }
}

/// Plays back queued steps, then repeats the fallback step forever.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<WireRequest>>,
}

impl ScriptedTransport {
    pub fn new(fallback: Step) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(Step::json(200, body))
    }

    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_fallback(&self, step: Step) {
        *self.fallback.lock().unwrap() = step;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpCall for ScriptedTransport {
    async fn call(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let step = {
            let next = self.steps.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match step {
            Step::Respond(resp) => Ok(resp),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(TransportError::Timeout)
            }
        }
    }
}
