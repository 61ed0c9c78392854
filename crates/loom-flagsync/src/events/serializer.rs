// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde_json::Value;

use super::event::Event;

/// Serializes payload events as a JSON array. Control events are skipped.
pub fn serialize_events(events: &[Event]) -> serde_json::Result<String> {
	let payloads: Vec<Value> = events.iter().filter_map(Event::payload).collect();
	serde_json::to_string(&payloads)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::event::MetricEvent;
	use loom_flagsync_core::User;

	#[test]
	fn test_skips_control_events() {
		let (flush, _done) = Event::flush();
		let events = vec![
			Event::from(MetricEvent::new(User::builder("u").build(), "a", 1.0)),
			flush,
		];

		let json: Vec<Value> = serde_json::from_str(&serialize_events(&events).unwrap()).unwrap();
		assert_eq!(json.len(), 1);
		assert_eq!(json[0]["metrics"][0]["eventName"], "a");
	}

	#[test]
	fn test_empty_is_empty_array() {
		assert_eq!(serialize_events(&[]).unwrap(), "[]");
	}
}
