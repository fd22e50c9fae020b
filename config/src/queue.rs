use anyhow::Result;

/// Queue names become part of every store key, so they must be non-empty
/// and free of whitespace.
pub fn validate_queue_name(queue_name: &str) -> Result<()> {
    if queue_name.is_empty() {
        anyhow::bail!("queue name must not be empty");
    }
    if queue_name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        anyhow::bail!("queue name '{queue_name}' must not contain whitespace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_queue_name;

    #[test]
    fn validate_queue_name_accepts_plain_names() {
        assert!(validate_queue_name("hello").is_ok());
        assert!(validate_queue_name("mail-ingest_2").is_ok());
    }

    #[test]
    fn validate_queue_name_rejects_empty_and_whitespace() {
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name("two words").is_err());
        assert!(validate_queue_name("tab\there").is_err());
    }
}
