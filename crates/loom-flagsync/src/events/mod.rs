// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Telemetry pipeline: queue, dispatcher, dedup and batching, sender.

mod dispatcher;
mod event;
mod processor;
mod queue;
mod sender;
mod serializer;

pub use dispatcher::{unique_events, EventDispatcher, MAX_EVENTS_PER_REQUEST};
pub use event::{Completion, EvalEvent, Event, MetricEvent, APP_TYPE};
pub use processor::{
	DefaultEventProcessor, EventProcessor, EventProcessorConfig, NullEventProcessor, DEFAULT_FLUSH_INTERVAL,
	DEFAULT_MAX_EVENTS_IN_QUEUE,
};
pub use queue::{EventQueue, SharedEventQueue};
pub use sender::{DeliveryResult, DeliveryStatus, EventSender, HttpEventSender, RETRY_DELAY};
pub use serializer::serialize_events;
