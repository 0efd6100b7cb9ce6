//! Built-in observability hooks
//!
//! Installed by default on every pipeline:
//! - [`TimestampInterceptor`]: stamps the attempt start
//! - [`ElapsedInterceptor`]: measures time to response
//! - [`ErrorRecorder`]: logs and keeps structured failure details

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};
use waypoint_domain::{ErrorKind, HttpMethod, PipelineError, TransportResponse};

use super::{ErrorInterceptor, HookError, RequestContext, RequestInterceptor, ResponseInterceptor};
use crate::metrics::PipelineMetrics;

const DEFAULT_FAILURE_HISTORY: usize = 32;

/// Stamps each attempt with monotonic and wall-clock start times
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampInterceptor;

impl RequestInterceptor for TimestampInterceptor {
    fn on_request(&self, mut request: RequestContext) -> Result<RequestContext, HookError> {
        request.started_at = Some(Instant::now());
        request.sent_at = Some(Utc::now());
        Ok(request)
    }

    fn name(&self) -> &str {
        "timestamp"
    }
}

/// Computes time from attempt start to response
#[derive(Debug, Clone)]
pub struct ElapsedInterceptor {
    metrics: Arc<PipelineMetrics>,
}

impl ElapsedInterceptor {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self { metrics }
    }
}

impl ResponseInterceptor for ElapsedInterceptor {
    fn on_response(
        &self,
        request: &RequestContext,
        response: TransportResponse,
    ) -> Result<TransportResponse, HookError> {
        let started_at = request
            .started_at
            .ok_or_else(|| HookError::new("attempt was not timestamped"))?;
        let elapsed = started_at.elapsed();
        self.metrics.record_response(elapsed);
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            attempt = request.attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            "response received"
        );
        Ok(response)
    }

    fn name(&self) -> &str {
        "elapsed"
    }
}

/// Structured details of one terminal failure
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub method: HttpMethod,
    pub endpoint: String,
    pub status: Option<u16>,
    pub message: String,
    pub attempt: u32,
    pub depth: u32,
    pub occurred_at: DateTime<Utc>,
    /// Time since the failing attempt started, when it was stamped
    pub elapsed: Option<Duration>,
}

/// Logs each terminal failure and keeps the most recent ones
#[derive(Debug)]
pub struct ErrorRecorder {
    metrics: Arc<PipelineMetrics>,
    history: Mutex<VecDeque<FailureRecord>>,
    capacity: usize,
}

impl ErrorRecorder {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self::with_capacity(metrics, DEFAULT_FAILURE_HISTORY)
    }

    pub fn with_capacity(metrics: Arc<PipelineMetrics>, capacity: usize) -> Self {
        Self { metrics, history: Mutex::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    /// Recorded failures, oldest first
    pub fn recent(&self) -> Vec<FailureRecord> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<FailureRecord> {
        self.history.lock().back().cloned()
    }
}

impl ErrorInterceptor for ErrorRecorder {
    fn on_error(
        &self,
        request: &RequestContext,
        error: PipelineError,
    ) -> Result<PipelineError, HookError> {
        let record = FailureRecord {
            kind: error.kind,
            method: request.method,
            endpoint: error.endpoint.clone(),
            status: error.status,
            message: error.message.clone(),
            attempt: request.attempt,
            depth: request.depth,
            occurred_at: error.occurred_at,
            elapsed: request.started_at.map(|started| started.elapsed()),
        };

        self.metrics.record_failure(record.kind);
        warn!(
            kind = %record.kind,
            method = %record.method,
            endpoint = %record.endpoint,
            status = ?record.status,
            attempt = record.attempt,
            depth = record.depth,
            error = %record.message,
            "request failed"
        );

        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(record);
        Ok(error)
    }

    fn name(&self) -> &str {
        "error_recorder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RequestContext {
        RequestContext::new(HttpMethod::Get, "/profile", 2, 3)
    }

    #[test]
    fn test_timestamp_then_elapsed_records_latency() {
        let metrics = Arc::new(PipelineMetrics::new());
        let stamped = TimestampInterceptor.on_request(context()).unwrap();
        assert!(stamped.started_at.is_some());

        let elapsed = ElapsedInterceptor::new(Arc::clone(&metrics));
        elapsed.on_response(&stamped, TransportResponse::new(200, "")).unwrap();
        assert_eq!(metrics.snapshot().responses, 1);
    }

    #[test]
    fn test_elapsed_without_timestamp_fails_softly() {
        let elapsed = ElapsedInterceptor::new(Arc::new(PipelineMetrics::new()));
        assert!(elapsed.on_response(&context(), TransportResponse::new(200, "")).is_err());
    }

    #[test]
    fn test_error_recorder_keeps_bounded_history() {
        let metrics = Arc::new(PipelineMetrics::new());
        let recorder = ErrorRecorder::with_capacity(Arc::clone(&metrics), 2);

        for status in [500u16, 502, 503] {
            let error = PipelineError::from_status("/profile", status, "");
            let out = recorder.on_error(&context(), error).unwrap();
            assert_eq!(out.status, Some(status));
        }

        let recent = recorder.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, Some(502));
        assert_eq!(recorder.last().map(|r| r.depth), Some(3));
        assert_eq!(metrics.snapshot().failure_count(ErrorKind::ServerError), 3);
    }
}
