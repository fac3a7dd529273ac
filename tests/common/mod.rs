#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use topic_tutor::generator::{ExplanationGenerator, GenerationError};
use topic_tutor::models::Mode;

/// Generator double: fixed replies, optional latency, recorded calls.
pub struct ScriptedGenerator {
    explanation: Option<String>,
    related: Vec<String>,
    delay: Duration,
    pub explain_calls: AtomicUsize,
    pub related_calls: AtomicUsize,
    pub seen: Mutex<Vec<(String, Option<String>, Mode)>>,
}

impl ScriptedGenerator {
    pub fn ok(explanation: &str, related: &[&str]) -> Self {
        Self {
            explanation: Some(explanation.to_string()),
            related: related.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
            explain_calls: AtomicUsize::new(0),
            related_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// `explain` always times out; `related` still answers.
    pub fn failing(related: &[&str]) -> Self {
        Self { explanation: None, ..Self::ok("", related) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn explain_count(&self) -> usize {
        self.explain_calls.load(Ordering::SeqCst)
    }

    pub fn related_count(&self) -> usize {
        self.related_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExplanationGenerator for ScriptedGenerator {
    async fn explain(&self, title: &str, parent_title: Option<&str>, mode: Mode) -> Result<String, GenerationError> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((title.to_string(), parent_title.map(str::to_string), mode));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.explanation.clone().ok_or(GenerationError::Timeout)
    }

    async fn related(&self, _title: &str, _explanation: Option<&str>) -> Vec<String> {
        self.related_calls.fetch_add(1, Ordering::SeqCst);
        self.related.clone()
    }
}
