//! Terminal output: progress bars and JSON envelopes.

mod envelope;
pub mod progress;

pub use envelope::{
    ErrorPayload, EventType, JsonEnvelope, ResultPayload, ResultType, SPEC_VERSION,
    emit_json_error, emit_json_result, error_code,
};
