//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// A configuration domain that can check itself
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Name used in [`ConfigError::DomainError`]
    fn domain_name(&self) -> &'static str;
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate an enum choice
pub fn validate_enum_choice<T>(
    value: &str,
    valid_choices: &[T],
    field_name: &str,
    domain: &str,
) -> ConfigResult<()>
where
    T: AsRef<str>,
{
    let valid: Vec<&str> = valid_choices.iter().map(|c| c.as_ref()).collect();

    if !valid.iter().any(|&v| v.eq_ignore_ascii_case(value)) {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} has invalid value '{}'. Valid choices: {}",
                field_name,
                value,
                valid.join(", ")
            ),
        });
    }

    Ok(())
}

/// Validate a port number
pub fn validate_port_range(port: u16, field_name: &str, domain: &str) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be 0", field_name),
        });
    }

    // Port 1-1023 are typically reserved for system services
    if port <= 1023 {
        log::warn!("{} port {} is in the reserved range (1-1023)", field_name, port);
    }

    Ok(())
}

/// Validate a broker or queue resource name
///
/// AMQP short strings cap names at 255 bytes.
pub fn validate_resource_name(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(value, field_name, domain)?;

    if value.len() > 255 {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} exceeds 255 bytes", field_name),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1u64, "tick", "orchestrator").is_ok());
        assert!(validate_positive(0u64, "tick", "orchestrator").is_err());
    }

    #[test]
    fn test_validate_enum_choice_is_case_insensitive() {
        assert!(validate_enum_choice("AMQP", &["amqp", "amqps"], "scheme", "broker").is_ok());
        assert!(validate_enum_choice("http", &["amqp", "amqps"], "scheme", "broker").is_err());
    }

    #[test]
    fn test_validate_resource_name() {
        assert!(validate_resource_name("conveyor_startup", "startup_queue", "orchestrator").is_ok());
        assert!(validate_resource_name("", "startup_queue", "orchestrator").is_err());
        let long = "q".repeat(256);
        assert!(validate_resource_name(&long, "startup_queue", "orchestrator").is_err());
    }
}
