//! Publish payload decoding

use chrono::Utc;
use wis2_common::types::{Notification, WisPayload};

use super::session::InboundPublish;
use crate::error::ReceiverError;

/// Decode a raw publish into a [`Notification`].
///
/// The integrity method is lower-cased and the receipt time stamped here;
/// `source` tags the notification with the broker it came from.
pub fn decode_notification(publish: &InboundPublish, source: &str) -> Result<Notification, ReceiverError> {
    let mut payload: WisPayload =
        serde_json::from_slice(&publish.payload).map_err(|e| ReceiverError::Decode {
            topic: publish.topic.clone(),
            source: e,
        })?;
    payload.integrity.method = payload.integrity.method.to_lowercase();

    Ok(Notification {
        topic: publish.topic.clone(),
        received: Utc::now(),
        source: source.to_string(),
        payload,
    })
}
