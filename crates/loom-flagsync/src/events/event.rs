// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Telemetry events.

use chrono::Utc;
use loom_flagsync_core::{User, Variation};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Application type reported with metric events.
pub const APP_TYPE: &str = "rust";

/// One-shot rendezvous for control events.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<()>);

impl Completion {
	pub fn new() -> (Self, oneshot::Receiver<()>) {
		let (tx, rx) = oneshot::channel();
		(Self(tx), rx)
	}

	pub fn complete(self) {
		let _ = self.0.send(());
	}
}

/// A custom metric recorded with `track`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
	pub user: User,
	pub event_name: String,
	pub app_type: String,
	pub numeric_value: f64,
	pub timestamp: i64,
}

impl MetricEvent {
	pub fn new(user: User, event_name: impl Into<String>, numeric_value: f64) -> Self {
		Self {
			user,
			event_name: event_name.into(),
			app_type: APP_TYPE.to_string(),
			numeric_value,
			timestamp: Utc::now().timestamp_millis(),
		}
	}

	fn body(&self, with_timestamp: bool) -> Value {
		let mut metric = json!({
			"route": "index/metric",
			"numericValue": self.numeric_value,
			"appType": self.app_type,
			"eventName": self.event_name,
			"type": "CustomEvent",
		});
		if with_timestamp {
			metric["timestamp"] = json!(self.timestamp);
		}
		json!({ "user": self.user, "metrics": [metric] })
	}
}

/// A flag evaluation served to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalEvent {
	pub user: User,
	pub flag_key: String,
	pub variation: Variation,
	pub send_to_experiment: bool,
	pub timestamp: i64,
}

impl EvalEvent {
	pub fn new(user: User, flag_key: impl Into<String>, variation: Variation, send_to_experiment: bool) -> Self {
		Self {
			user,
			flag_key: flag_key.into(),
			variation,
			send_to_experiment,
			timestamp: Utc::now().timestamp_millis(),
		}
	}

	fn body(&self, with_timestamp: bool) -> Value {
		let mut record = json!({
			"featureFlagKey": self.flag_key,
			"sendToExperiment": self.send_to_experiment,
			"variation": self.variation,
		});
		if with_timestamp {
			record["timestamp"] = json!(self.timestamp);
		}
		json!({ "user": self.user, "variations": [record] })
	}
}

/// Everything that travels through the event queue.
#[derive(Debug)]
pub enum Event {
	Metric(MetricEvent),
	Eval(EvalEvent),
	Flush(Completion),
	Shutdown(Completion),
}

impl Event {
	pub fn flush() -> (Self, oneshot::Receiver<()>) {
		let (completion, done) = Completion::new();
		(Event::Flush(completion), done)
	}

	pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
		let (completion, done) = Completion::new();
		(Event::Shutdown(completion), done)
	}

	pub fn is_payload(&self) -> bool {
		matches!(self, Event::Metric(_) | Event::Eval(_))
	}

	/// Wire payload. `None` for control events.
	pub fn payload(&self) -> Option<Value> {
		match self {
			Event::Metric(e) => Some(e.body(true)),
			Event::Eval(e) => Some(e.body(true)),
			Event::Flush(_) | Event::Shutdown(_) => None,
		}
	}

	/// Dedup identity: the payload without its timestamp.
	pub fn hash(&self) -> Option<String> {
		match self {
			Event::Metric(e) => Some(e.body(false).to_string()),
			Event::Eval(e) => Some(e.body(false).to_string()),
			Event::Flush(_) | Event::Shutdown(_) => None,
		}
	}

	/// Resolves the waiter of a control event; no-op for payload events.
	pub fn complete(self) {
		match self {
			Event::Flush(c) | Event::Shutdown(c) => c.complete(),
			Event::Metric(_) | Event::Eval(_) => {}
		}
	}
}

impl From<MetricEvent> for Event {
	fn from(event: MetricEvent) -> Self {
		Event::Metric(event)
	}
}

impl From<EvalEvent> for Event {
	fn from(event: EvalEvent) -> Self {
		Event::Eval(event)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn user() -> User {
		User::builder("u1").name("Ada").custom("plan", "pro").build()
	}

	#[test]
	fn test_metric_payload_shape() {
		let mut event = MetricEvent::new(user(), "checkout", 2.5);
		event.timestamp = 1234;
		let payload = Event::from(event).payload().unwrap();

		assert_eq!(payload["user"]["keyId"], "u1");
		assert_eq!(payload["user"]["customizedProperties"][0]["name"], "plan");
		let metric = &payload["metrics"][0];
		assert_eq!(metric["route"], "index/metric");
		assert_eq!(metric["timestamp"], 1234);
		assert_eq!(metric["numericValue"], 2.5);
		assert_eq!(metric["appType"], APP_TYPE);
		assert_eq!(metric["eventName"], "checkout");
		assert_eq!(metric["type"], "CustomEvent");
	}

	#[test]
	fn test_eval_payload_shape() {
		let event = EvalEvent::new(user(), "banner", Variation::new(Some(3), "true"), true);
		let payload = Event::from(event).payload().unwrap();

		let record = &payload["variations"][0];
		assert_eq!(record["featureFlagKey"], "banner");
		assert_eq!(record["sendToExperiment"], true);
		assert_eq!(record["variation"]["id"], 3);
		assert_eq!(record["variation"]["value"], "true");
		assert!(record["timestamp"].is_i64());
	}

	#[test]
	fn test_hash_ignores_timestamp() {
		let mut a = MetricEvent::new(user(), "click", 1.0);
		let mut b = a.clone();
		a.timestamp = 1;
		b.timestamp = 2;

		let (a, b) = (Event::from(a), Event::from(b));
		assert_eq!(a.hash(), b.hash());
		assert_ne!(a.payload(), b.payload());
		assert!(!a.hash().unwrap().contains("timestamp"));
	}

	#[test]
	fn test_hash_differs_by_business_fields() {
		let a = Event::from(MetricEvent::new(user(), "click", 1.0));
		let b = Event::from(MetricEvent::new(user(), "click", 2.0));
		assert_ne!(a.hash(), b.hash());
	}

	#[test]
	fn test_control_events_have_no_payload() {
		let (flush, _done) = Event::flush();
		assert!(!flush.is_payload());
		assert_eq!(flush.payload(), None);
		assert_eq!(flush.hash(), None);
	}

	#[tokio::test]
	async fn test_completion_resolves_waiter() {
		let (event, done) = Event::shutdown();
		event.complete();
		done.await.unwrap();
	}
}
