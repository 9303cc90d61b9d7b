use super::dispatch::DispatchOutcome;
use super::event::{USER_CREATED, USER_DELETED, USER_UPDATED, WebhookEvent};
use super::signature::{ID_HEADERS, WebhookHeaders};
use crate::error::{SyncError, WebhookResponse};
use crate::metrics::DeliveryMetrics;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{Instrument, error, info, info_span};

/// Event type and user id read from a verified payload before it is decoded,
/// so decoding failures are still logged against them.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EventContext {
    event_type: String,
    user_id: Option<String>,
}

impl EventContext {
    fn peek(payload: &Value) -> Self {
        Self {
            event_type: payload
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            user_id: payload
                .pointer("/data/id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Metric label: known types by name, everything else as "other".
    fn metric_label(&self) -> &str {
        match self.event_type.as_str() {
            USER_CREATED | USER_UPDATED | USER_DELETED | "unknown" => &self.event_type,
            _ => "other",
        }
    }
}

/// `POST /api/clerk`: takes the body as raw bytes so the signature is checked
/// against exactly what the provider sent.
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let msg_id = ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let span = info_span!("webhook_delivery", msg_id = %msg_id, body_bytes = body.len());

    async move {
        let mut metrics = DeliveryMetrics::start();
        let mut context: Option<EventContext> = None;

        let result = process(&state, &headers, &body, &mut metrics, &mut context).await;

        match result {
            Ok(outcome) => {
                let context = context.unwrap_or_else(|| EventContext::peek(&Value::Null));
                info!(
                    event_type = %context.event_type,
                    user_id = context.user_id.as_deref().unwrap_or("-"),
                    outcome = outcome.as_str(),
                    "webhook processed"
                );
                metrics.success(outcome.as_str());
                WebhookResponse::received().into_response()
            }
            Err(err) => {
                let code = err.code();
                match (&err, context) {
                    (SyncError::Verification(reason), _) => {
                        crate::log_security_event!(
                            "webhook_verification_failed",
                            reason = %reason,
                            error_category = code.category(),
                            "rejected webhook delivery"
                        );
                    }
                    (_, Some(context)) => {
                        error!(
                            event_type = %context.event_type,
                            user_id = context.user_id.as_deref().unwrap_or("-"),
                            error_code = %code,
                            error_category = code.category(),
                            error = %err,
                            "webhook processing failed"
                        );
                    }
                    (_, None) => {
                        error!(
                            error_code = %code,
                            error_category = code.category(),
                            error = %err,
                            "webhook processing failed"
                        );
                    }
                }
                metrics.error(code.as_str(), code.category());
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

async fn process(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    metrics: &mut DeliveryMetrics,
    context: &mut Option<EventContext>,
) -> Result<DispatchOutcome, SyncError> {
    let webhook_headers = WebhookHeaders::from_header_map(headers)?;
    let payload = state.verifier.verify(&webhook_headers, body)?;

    let peeked = EventContext::peek(&payload);
    metrics.set_event(peeked.metric_label());
    *context = Some(peeked);

    let event = WebhookEvent::from_value(payload)?;
    state.dispatcher.dispatch(event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn peek_reads_type_and_id_without_decoding_data() {
        let context = EventContext::peek(&json!({
            "type": "user.updated",
            "data": { "id": "user_1" }
        }));
        assert_eq!(context.event_type, "user.updated");
        assert_eq!(context.user_id.as_deref(), Some("user_1"));
        assert_eq!(context.metric_label(), "user.updated");
    }

    #[test]
    fn peek_keeps_type_when_data_is_unusable() {
        let context = EventContext::peek(&json!({ "type": "user.updated", "data": [] }));
        assert_eq!(context.event_type, "user.updated");
        assert_eq!(context.user_id, None);
    }

    #[test]
    fn unhandled_types_share_one_metric_label() {
        let context = EventContext::peek(&json!({ "type": "session.created" }));
        assert_eq!(context.event_type, "session.created");
        assert_eq!(context.metric_label(), "other");

        let missing = EventContext::peek(&json!({}));
        assert_eq!(missing.event_type, "unknown");
        assert_eq!(missing.metric_label(), "unknown");
    }
}
