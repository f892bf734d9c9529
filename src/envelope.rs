//! JSON envelope carrying note payloads over the realtime transport.
//!
//! Outbound: `[{"m":"custom","data":{"n":"<base64>"},"target":{"mode":"subscribed"}}]`

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

const CUSTOM: &str = "custom";
const SUBSCRIBED: &str = "subscribed";

#[derive(Debug, Clone, Serialize)]
struct NoteData<'a> {
    n: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct Target<'a> {
    mode: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct CustomMessage<'a> {
    m: &'a str,
    data: NoteData<'a>,
    target: Target<'a>,
}

pub fn to_envelope(payload: &str) -> Result<String> {
    let msg = CustomMessage {
        m: CUSTOM,
        data: NoteData { n: payload },
        target: Target { mode: SUBSCRIBED },
    };
    Ok(serde_json::to_string(&[msg])?)
}

/// Pulls every note payload out of an inbound message array. Messages that
/// are not `custom` or carry no string `data.n` are skipped.
pub fn parse_payloads(text: &str) -> Result<Vec<String>> {
    let messages: Vec<Value> = serde_json::from_str(text)?;
    Ok(messages
        .iter()
        .filter(|msg| msg.get("m").and_then(Value::as_str) == Some(CUSTOM))
        .filter_map(|msg| msg.pointer("/data/n").and_then(Value::as_str))
        .map(str::to_owned)
        .collect())
}
