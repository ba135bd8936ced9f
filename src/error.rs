use thiserror::Error;

/// Rejections raised while assembling a launch configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "container {} must be filled out before choosing a container kind",
        .0.join(" and ")
    )]
    MissingFields(Vec<&'static str>),
    #[error("port range must be declared like XXXXX-YYYYY (example: 80-123), got '{0}'")]
    MalformedPortRange(String),
    #[error("port {0} is out of range, ports must be between 1 and 65535")]
    PortOutOfRange(u64),
    #[error("port range {begin}-{end} must end after it begins")]
    InvertedRange { begin: u16, end: u16 },
    #[error("host range {host} spans {host_span} ports but container range {container} spans {container_span}")]
    SpanMismatch {
        host: String,
        container: String,
        host_span: u16,
        container_span: u16,
    },
    #[error("can only execute one command")]
    DuplicateCommand,
    #[error("invalid {field} '{value}': {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Fleet-level failures that are not backend faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),
    #[error("provider '{0}' not found")]
    ProviderNotFound(String),
    #[error("container '{0}' not found in any provider")]
    ContainerNotFound(String),
    #[error("no provider can host {demand} more container(s)")]
    NoCapacity { demand: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_message_names_every_field() {
        let err = ConfigError::MissingFields(vec!["name", "image"]);
        assert_eq!(
            err.to_string(),
            "container name and image must be filled out before choosing a container kind"
        );
    }

    #[test]
    fn span_mismatch_message_shows_both_ranges() {
        let err = ConfigError::SpanMismatch {
            host: "80-85".into(),
            container: "80-84".into(),
            host_span: 5,
            container_span: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("80-85"));
        assert!(msg.contains("80-84"));
    }
}
