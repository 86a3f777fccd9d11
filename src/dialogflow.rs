//! Dialogflow fulfillment webhook.
//!
//! Dialogflow posts the matched intent and the user's raw text. For the two
//! order intents the text is expected to read `Nomor ID: <id> Nama: <name>`;
//! when it names a known customer the conversation is handed over to a human
//! agent, otherwise it is sent to the intent's fallback branch.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{IntoResponse, Json, Request, Response};

pub const WEBHOOK_PATH: &str = "/wh/dialogflow";

const LANGUAGE_CODE: &str = "en-US";
const HANDOVER_EVENT: &str = "handover-intent";

const COMPLAINT_INTENT: &str = "1komplain-pesanan-sent-intent";
const CONFIRMATION_INTENT: &str = "2konfirmasi-pesanan-sent-intent";
const COMPLAINT_FALLBACK: &str = "1komplain-pesanan-fallback-intent";
const CONFIRMATION_FALLBACK: &str = "2konfirmasi-pesanan-fallback-intent";

/// Customers with an order on file.
const KNOWN_CUSTOMERS: &[Customer] = &[
    Customer { id: 1234, name: "Joko" },
    Customer { id: 4567, name: "Budi" },
    Customer { id: 6789, name: "Susi" },
];

// ── Wire types ───────────────────────────────────────────────────────────────

/// Webhook request body. Missing fields decode as empty strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookRequest {
    pub query_result: QueryResult,
    pub session: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryResult {
    pub query_text: String,
    pub intent: IntentRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntentRef {
    pub display_name: String,
}

impl WebhookRequest {
    pub fn intent(&self) -> &str { &self.query_result.intent.display_name }
    pub fn query_text(&self) -> &str { &self.query_result.query_text }
}

/// Webhook response body: the event Dialogflow should trigger next.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub followup_event_input: FollowupEventInput,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupEventInput {
    pub name: String,
    pub language_code: String,
    pub parameters: Parameters,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct Parameters {
    #[serde(rename = "param-name")]
    pub param_name: String,
}

impl WebhookResponse {
    fn event(name: &str) -> Self {
        Self {
            followup_event_input: FollowupEventInput {
                name: name.to_owned(),
                language_code: LANGUAGE_CODE.to_owned(),
                parameters: Parameters::default(),
            },
        }
    }
}

// ── Business rules ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Customer {
    id: i64,
    name: &'static str,
}

/// The order intents this webhook understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Intent {
    Complaint,
    Confirmation,
    Other,
}

impl Intent {
    fn from_display_name(name: &str) -> Self {
        match name {
            COMPLAINT_INTENT => Self::Complaint,
            CONFIRMATION_INTENT => Self::Confirmation,
            _ => Self::Other,
        }
    }

    /// Event to send the conversation to when the order cannot be verified.
    fn fallback_event(self) -> &'static str {
        match self {
            Self::Complaint => COMPLAINT_FALLBACK,
            Self::Confirmation => CONFIRMATION_FALLBACK,
            Self::Other => "",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderTextError {
    #[error("invalid data format")]
    Format,
    #[error("invalid customer id: {0}")]
    Id(#[from] std::num::ParseIntError),
}

/// Parses `Nomor ID: <id> Nama: <name>` (whitespace-separated) into the
/// customer id and name. Tokens after the name are ignored.
pub fn parse_order_text(text: &str) -> Result<(i64, &str), OrderTextError> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [nomor, id_label, id, nama_label, name, ..] = parts.as_slice() else {
        return Err(OrderTextError::Format);
    };
    if *nomor != "Nomor" || *id_label != "ID:" || *nama_label != "Nama:" {
        return Err(OrderTextError::Format);
    }
    Ok((id.parse()?, *name))
}

/// Decides the follow-up event for an intent and the user's text.
pub fn process_intent(text: &str, display_name: &str) -> WebhookResponse {
    let intent = Intent::from_display_name(display_name);

    let (id, name) = match parse_order_text(text) {
        Ok(order) => order,
        Err(e) => {
            tracing::error!(error = %e, "failed to extract customer data");
            return WebhookResponse::event(intent.fallback_event());
        }
    };

    let known = intent != Intent::Other
        && KNOWN_CUSTOMERS.iter().any(|c| c.id == id && c.name == name);
    if !known {
        tracing::error!(customer_id = id, customer_name = name, "customer data not available");
        return WebhookResponse::event(intent.fallback_event());
    }

    WebhookResponse::event(HANDOVER_EVENT)
}

// ── Handler ──────────────────────────────────────────────────────────────────

/// `POST /wh/dialogflow`
pub async fn webhook(req: Request) -> Response {
    let payload: WebhookRequest = match req.json().await {
        Ok(payload) => payload,
        Err(e) => {
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .text(format!("{e}\n"));
        }
    };

    let reply = process_intent(payload.query_text(), payload.intent());
    tracing::debug!(session = payload.session.as_str(), event = reply.followup_event_input.name.as_str(), "fulfillment response");
    Json(reply).into_response()
}
