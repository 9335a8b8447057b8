//! Traffic classification
//!
//! Decides whether an intercepted request or response belongs to the target
//! application and, if so, tags it. Requests are matched on host and port;
//! responses additionally need their effective MIME type to be allowed.
//! Matching requests get the `X-TCB: 1` marker header, and both directions get
//! a `[TCB]` comment and an event row. Everything else passes through untouched.

use crate::config::FilterSettings;
use crate::error::ClassificationFailure;
use crate::filter::FilterRuleSet;
use crate::message::{analyze_request, analyze_response, insert_header, HttpService, InterceptedMessage};
use crate::mime::{effective_mime, infer_mime, UNKNOWN_MIME};
use crate::policy::{ApplyOutcome, RuleStore};
use crate::recorder::{
    EventRecorder, EventRow, RowKind, ARROW_REQUEST, ARROW_RESPONSE, LABELED, PASS,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const TAG: &str = "[TCB]";
pub const MARKER_HEADER_NAME: &str = "X-TCB";
pub const MARKER_HEADER_VALUE: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Request => ARROW_REQUEST,
            Direction::Response => ARROW_RESPONSE,
        }
    }
}

/// One intercepted message, reduced to what classification looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficEvent {
    pub direction: Direction,
    pub host: String,
    pub port: u16,
    /// Request method, or response status code
    pub method_or_status: String,
    /// Effective MIME type, responses only
    pub mime: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl TrafficEvent {
    pub fn request(service: &HttpService, method: impl Into<String>) -> Self {
        Self {
            direction: Direction::Request,
            host: service.host.clone(),
            port: service.port,
            method_or_status: method.into(),
            mime: None,
            timestamp: Local::now(),
        }
    }

    pub fn response(service: &HttpService, status_code: u16, mime: impl Into<String>) -> Self {
        Self {
            direction: Direction::Response,
            host: service.host.clone(),
            port: service.port,
            method_or_status: status_code.to_string(),
            mime: Some(mime.into()),
            timestamp: Local::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub matched: bool,
    pub label: String,
    pub annotation: Option<String>,
}

impl ClassificationResult {
    pub fn pass() -> Self {
        Self {
            matched: false,
            label: PASS.to_string(),
            annotation: None,
        }
    }

    pub fn labeled(annotation: String) -> Self {
        Self {
            matched: true,
            label: LABELED.to_string(),
            annotation: Some(annotation),
        }
    }
}

/// Pure decision for one event against one rule snapshot
pub fn classify(event: &TrafficEvent, rules: &FilterRuleSet) -> ClassificationResult {
    if !rules.matches_host_port(&event.host, event.port) {
        return ClassificationResult::pass();
    }

    match event.direction {
        Direction::Request => ClassificationResult::labeled(format!("{} host/port match", TAG)),
        Direction::Response => {
            let mime = event.mime.as_deref().unwrap_or(UNKNOWN_MIME);
            if rules.mime_allowed(mime) {
                ClassificationResult::labeled(format!("{} mime match: {}", TAG, mime))
            } else {
                ClassificationResult::pass()
            }
        }
    }
}

/// Classifies messages handed over by the host proxy.
///
/// Safe to share between proxy I/O threads. Each call works on the rule
/// snapshot current when it started.
#[derive(Clone)]
pub struct TrafficClassifier {
    rules: Arc<RuleStore>,
    recorder: Arc<dyn EventRecorder>,
}

impl TrafficClassifier {
    pub fn new(rules: Arc<RuleStore>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self { rules, recorder }
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Apply new allow-list settings and report the outcome to the recorder
    pub fn apply(&self, settings: &FilterSettings) -> ApplyOutcome {
        let outcome = self.rules.apply(settings);
        for error in &outcome.errors {
            self.recorder.record(EventRow::warn(error.to_string()));
        }
        self.recorder
            .record(EventRow::info(format!("Filters applied: {}", outcome.rules)));
        outcome
    }

    /// Entry point for the host proxy.
    ///
    /// Failures are logged and recorded as a warning row; the message is then
    /// treated as non-matching.
    pub fn process_message(
        &self,
        message: &mut dyn InterceptedMessage,
        is_request: bool,
    ) -> ClassificationResult {
        let result = if is_request {
            self.process_request(message)
        } else {
            self.process_response(message)
        };

        result.unwrap_or_else(|e| {
            warn!("processHttpMessage: {}", e);
            self.recorder
                .record(EventRow::warn(format!("processHttpMessage: {}", e)));
            ClassificationResult::pass()
        })
    }

    pub fn process_request(
        &self,
        message: &mut dyn InterceptedMessage,
    ) -> Result<ClassificationResult, ClassificationFailure> {
        let rules = self.rules.snapshot();
        let service = message
            .service()
            .cloned()
            .ok_or(ClassificationFailure::MissingService)?;

        if !rules.matches_host_port(&service.host, service.port) {
            debug!("Request to {}:{} out of scope", service.host, service.port);
            return Ok(ClassificationResult::pass());
        }

        let info = analyze_request(message.request())?;
        let event = TrafficEvent::request(&service, info.method.clone());
        let result = classify(&event, &rules);

        if let Some(annotation) = &result.annotation {
            let marker = format!("{}: {}", MARKER_HEADER_NAME, MARKER_HEADER_VALUE);
            let updated = insert_header(message.request(), info.body_offset, &marker);
            message.set_request(updated);
            message.set_comment(annotation.clone());
            self.recorder.record(EventRow::labeled(
                RowKind::Request,
                &event.host,
                event.port,
                event.method_or_status.clone(),
            ));
            debug!("Labeled request {} {}:{}", info.method, service.host, service.port);
        }

        Ok(result)
    }

    pub fn process_response(
        &self,
        message: &mut dyn InterceptedMessage,
    ) -> Result<ClassificationResult, ClassificationFailure> {
        let rules = self.rules.snapshot();
        let service = message
            .service()
            .cloned()
            .ok_or(ClassificationFailure::MissingService)?;

        if !rules.matches_host_port(&service.host, service.port) {
            debug!("Response from {}:{} out of scope", service.host, service.port);
            return Ok(ClassificationResult::pass());
        }

        let raw = message
            .response()
            .ok_or(ClassificationFailure::MissingResponse)?;
        let info = analyze_response(raw)?;

        let inferred = match message.inferred_mime() {
            Some(mime) => Some(mime.to_string()),
            None => infer_mime(&raw[info.body_offset..]).map(str::to_string),
        };
        let mime = effective_mime(inferred.as_deref(), info.stated_mime.as_deref());

        let event = TrafficEvent::response(&service, info.status_code, mime);
        let result = classify(&event, &rules);

        if let Some(annotation) = &result.annotation {
            message.set_comment(annotation.clone());
            self.recorder.record(EventRow::labeled(
                RowKind::Response,
                &event.host,
                event.port,
                event.method_or_status.clone(),
            ));
            debug!("Labeled response {} from {}:{}", info.status_code, service.host, service.port);
        }

        Ok(result)
    }
}
