//! Streaming and non-streaming model calls behind one result shape.
//!
//! When a streaming attempt reports [`StreamOutcome::Unsupported`], the same
//! request is retried once without streaming. Partial deltas from the failed
//! attempt are not part of the returned result, and the retry emits no deltas.
//! Before the retry, `on_reset` is told how many already-forwarded deltas were
//! discarded so a renderer can retract them.

use serde_json::json;

use crate::model_io::{ModelIoPhase, ModelIoSink};
use crate::provider::{ModelProvider, ModelRequest, ModelResult, ProviderError, StreamOutcome};

/// A delivered model result plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub result: ModelResult,
    pub streamed: bool,
    pub fell_back: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamDeliveryController;

impl StreamDeliveryController {
    pub fn new() -> Self {
        Self
    }

    /// Runs one model call. Deltas reach `on_delta` strictly in generation order
    /// and only while this call is in progress.
    pub fn deliver(
        &self,
        provider: &dyn ModelProvider,
        request: &ModelRequest,
        stream: bool,
        on_delta: &mut dyn FnMut(&str),
        on_reset: &mut dyn FnMut(usize),
        sink: &ModelIoSink<'_>,
    ) -> Result<Delivery, ProviderError> {
        if !stream {
            return provider.complete(request).map(|result| Delivery {
                result,
                streamed: false,
                fell_back: false,
            });
        }

        let mut forwarded = 0usize;
        let outcome = provider.complete_stream(request, &mut |delta: &str| {
            forwarded += 1;
            on_delta(delta);
        })?;

        match outcome {
            StreamOutcome::Delivered(result) => Ok(Delivery {
                result,
                streamed: true,
                fell_back: false,
            }),
            StreamOutcome::Unsupported { reason } => {
                tracing::warn!(
                    trace_id = %request.trace_id,
                    round = request.round,
                    %reason,
                    discarded_deltas = forwarded,
                    "streaming unsupported, retrying without streaming"
                );
                sink.emit(
                    ModelIoPhase::StreamFallback,
                    Some(request.round),
                    json!({
                        "reason": reason,
                        "discarded_deltas": forwarded,
                    }),
                );
                if forwarded > 0 {
                    on_reset(forwarded);
                }

                let result = provider.complete(request)?;
                Ok(Delivery {
                    result,
                    streamed: false,
                    fell_back: true,
                })
            }
        }
    }
}
