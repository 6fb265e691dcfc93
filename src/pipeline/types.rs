//! Webhook payload extraction, one shape per gateway.

use serde_json::Value;

/// A normalized inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub phone: String,
    pub text: String,
    pub push_name: Option<String>,
}

/// Strip WhatsApp jid suffixes from a sender id.
pub fn clean_phone(phone: &str) -> &str {
    phone
        .strip_suffix("@c.us")
        .or_else(|| phone.strip_suffix("@s.whatsapp.net"))
        .or_else(|| phone.strip_suffix("@g.us"))
        .unwrap_or(phone)
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Extract a message from a provider webhook payload.
///
/// Returns `Ok(None)` for payloads that should be ignored: non-message
/// events, empty bodies, group chats, and non-text message types.
pub fn extract_message(provider: &str, payload: &Value) -> Option<ExtractedMessage> {
    let (from, text, push_name) = match provider {
        // WAHA nests the message under a "payload" object.
        "waha" => {
            let event = str_field(payload, "event")?;
            if event != "message" {
                return None;
            }
            let inner = payload.get("payload")?;
            let from = str_field(inner, "from")?;
            let body = str_field(inner, "body")?;
            let push_name = inner
                .get("_data")
                .and_then(|d| d.get("notifyName"))
                .and_then(|v| v.as_str())
                .map(String::from);
            (from, body, push_name)
        }
        "wablas" => {
            let from = str_field(payload, "phone")?;
            let body = str_field(payload, "message")?;
            let push_name = str_field(payload, "pushname").map(String::from);
            (from, body, push_name)
        }
        "whacenter" => {
            let event = str_field(payload, "event")?;
            if event != "message" {
                return None;
            }
            let from = str_field(payload, "from")?;
            let body = str_field(payload, "message").or_else(|| str_field(payload, "body"))?;
            (from, body, None)
        }
        // Generic flat shape used by the plain webhook endpoint.
        _ => {
            let event = str_field(payload, "event")?;
            if event != "message" && event != "messages.upsert" {
                return None;
            }
            if let Some(kind) = str_field(payload, "type") {
                if kind != "text" {
                    return None;
                }
            }
            let from = str_field(payload, "from")?;
            let body = str_field(payload, "body")?;
            (from, body, None)
        }
    };

    // Group chats are never processed.
    if from.ends_with("@g.us") {
        return None;
    }

    Some(ExtractedMessage {
        phone: clean_phone(from).to_string(),
        text: text.to_string(),
        push_name,
    })
}
