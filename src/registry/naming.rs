use crate::error::{BusError, BusResult};

/// Service names: non-empty, no `/`, no whitespace or control characters.
pub fn validate_name(name: &str) -> BusResult<()> {
    if name.is_empty() {
        return Err(BusError::invalid_name(name, "empty"));
    }
    if name.contains('/') {
        return Err(BusError::invalid_name(name, "contains '/'"));
    }
    if let Some(c) = name.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(BusError::invalid_name(name, format!("contains {:?}", c)));
    }
    Ok(())
}

/// Topics: non-empty, no whitespace or control characters.
pub fn validate_topic(topic: &str) -> BusResult<()> {
    if topic.is_empty() {
        return Err(BusError::invalid_topic(topic, "empty"));
    }
    if let Some(c) = topic.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(BusError::invalid_topic(topic, format!("contains {:?}", c)));
    }
    Ok(())
}
