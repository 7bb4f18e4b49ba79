use crate::error::DomainError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Short random suffix used to keep correlation ids unique across
/// redelivered copies of the same ticket event.
pub fn correlation_suffix() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id.chars().take(8).collect()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn immutable_event_hash<T>(value: &T) -> crate::DomainResult<String>
where
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|err| {
        DomainError::Validation(format!("failed to serialize audit payload: {err}"))
    })?;
    let digest = Sha256::digest(&payload);
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_suffix_is_eight_chars() {
        assert_eq!(correlation_suffix().len(), 8);
    }

    #[test]
    fn correlation_suffix_varies() {
        assert_ne!(correlation_suffix(), correlation_suffix());
    }

}
