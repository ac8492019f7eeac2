use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("compass_chat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("compass_chat.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("compass_chat.client.request_duration_seconds");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("compass_chat.stream.events");
pub(crate) static STREAM_FRAME_ERRORS: Counter = Counter::new("compass_chat.stream.frame_errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("compass_chat.stream.bytes");
pub(crate) static STREAM_TTFE: Moments = Moments::new("compass_chat.stream.ttfe_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("compass_chat.stream.duration_seconds");
pub(crate) static STREAM_IDLE_TIMEOUTS: Counter = Counter::new("compass_chat.stream.idle_timeouts");

pub(crate) static SESSION_SENDS: Counter = Counter::new("compass_chat.session.sends");
pub(crate) static SESSION_RETRIES: Counter = Counter::new("compass_chat.session.retries");
pub(crate) static SESSION_CANCELLATIONS: Counter =
    Counter::new("compass_chat.session.cancellations");
pub(crate) static SESSION_ERRORS: Counter = Counter::new("compass_chat.session.errors");
pub(crate) static SESSION_STALE_UPDATES: Counter =
    Counter::new("compass_chat.session.stale_updates");
pub(crate) static SESSION_TOOL_CALLS: Counter = Counter::new("compass_chat.session.tool_calls");
pub(crate) static SESSION_ORPHAN_RESULTS: Counter =
    Counter::new("compass_chat.session.orphan_tool_results");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_FRAME_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFE);
    collector.register_moments(&STREAM_DURATION);
    collector.register_counter(&STREAM_IDLE_TIMEOUTS);

    collector.register_counter(&SESSION_SENDS);
    collector.register_counter(&SESSION_RETRIES);
    collector.register_counter(&SESSION_CANCELLATIONS);
    collector.register_counter(&SESSION_ERRORS);
    collector.register_counter(&SESSION_STALE_UPDATES);
    collector.register_counter(&SESSION_TOOL_CALLS);
    collector.register_counter(&SESSION_ORPHAN_RESULTS);
}
