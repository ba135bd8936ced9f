use crate::error::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static PORT_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)-([0-9]+)$").expect("static port range pattern"));

/// Which kind of container a [`LaunchConfig`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerKind {
    /// Persistent storage with no task of its own, mounted by other containers.
    DataVolume,
    /// Runs one main command.
    Command,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataVolume => f.pad("data-volume"),
            Self::Command => f.pad("command"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The container is removed once its task completes. Bound data volumes survive.
    Cleanup,
    /// The container keeps running in the background.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostVolume {
    pub host_path: String,
    pub container_path: String,
}

/// Link to another container, reachable under `alias` from inside this one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub name: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
}

/// A validated inclusive port range such as `8000-8005`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRange {
    begin: u16,
    end: u16,
}

impl PortRange {
    pub fn begin(&self) -> u16 {
        self.begin
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn span(&self) -> u16 {
        self.end - self.begin
    }

    /// Validates a host/container range pair.
    ///
    /// Both strings must match `digits-digits`, every endpoint must be a valid port,
    /// the host range must end after it begins and both ranges must cover the same
    /// number of ports.
    pub fn pair(host: &str, container: &str) -> Result<(PortRange, PortRange), ConfigError> {
        let (host_begin, host_end) = split_range(host)?;
        let (container_begin, container_end) = split_range(container)?;

        let host_begin = validate_port(host_begin)?;
        let host_end = validate_port(host_end)?;
        let container_begin = validate_port(container_begin)?;
        let container_end = validate_port(container_end)?;

        if host_end <= host_begin {
            return Err(ConfigError::InvertedRange {
                begin: host_begin,
                end: host_end,
            });
        }

        let host_span = u32::from(host_end) - u32::from(host_begin);
        let container_span = i64::from(container_end) - i64::from(container_begin);
        if i64::from(host_span) != container_span {
            return Err(ConfigError::SpanMismatch {
                host: host.to_string(),
                container: container.to_string(),
                host_span: host_span as u16,
                container_span: container_span.max(0) as u16,
            });
        }

        Ok((
            PortRange {
                begin: host_begin,
                end: host_end,
            },
            PortRange {
                begin: container_begin,
                end: container_end,
            },
        ))
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.begin, self.end)
    }
}

fn split_range(raw: &str) -> Result<(u64, u64), ConfigError> {
    let caps = PORT_RANGE
        .captures(raw)
        .ok_or_else(|| ConfigError::MalformedPortRange(raw.to_string()))?;
    // Digit runs too long for u64 cannot be ports anyway.
    let endpoint = |i: usize| caps[i].parse::<u64>().unwrap_or(u64::MAX);
    Ok((endpoint(1), endpoint(2)))
}

pub(crate) fn validate_port(port: u64) -> Result<u16, ConfigError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 && p < u16::MAX => Ok(p),
        _ => Err(ConfigError::PortOutOfRange(port)),
    }
}

/// A host to container port forwarding entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortMapping {
    Single { host: u16, container: u16 },
    Range { host: PortRange, container: PortRange },
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { host, container } => write!(f, "{host}:{container}"),
            Self::Range { host, container } => write!(f, "{host}:{container}"),
        }
    }
}

impl FromStr for PortMapping {
    type Err = ConfigError;

    /// Parses `host:container` where both sides are either ports or ranges.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, container) = s.split_once(':').ok_or(ConfigError::InvalidValue {
            field: "port mapping",
            value: s.to_string(),
            reason: "expected HOST:CONTAINER",
        })?;

        if host.contains('-') || container.contains('-') {
            let (host, container) = PortRange::pair(host, container)?;
            return Ok(Self::Range { host, container });
        }

        let parse = |side: &str| -> Result<u16, ConfigError> {
            let port = side
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "port mapping",
                    value: s.to_string(),
                    reason: "ports must be numeric",
                })?;
            validate_port(port)
        };

        Ok(Self::Single {
            host: parse(host)?,
            container: parse(container)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataVolumeOptions {
    pub(crate) volumes: BTreeSet<String>,
}

impl DataVolumeOptions {
    pub fn volumes(&self) -> &BTreeSet<String> {
        &self.volumes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    pub(crate) data_volume_containers: BTreeSet<String>,
    pub(crate) host_volumes: BTreeSet<HostVolume>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) mode: Option<Mode>,
    pub(crate) links: BTreeSet<Link>,
    pub(crate) command: Option<Command>,
    pub(crate) map_exposed_ports: bool,
    pub(crate) port_map: BTreeSet<PortMapping>,
}

impl CommandOptions {
    pub fn data_volume_containers(&self) -> &BTreeSet<String> {
        &self.data_volume_containers
    }

    pub fn host_volumes(&self) -> &BTreeSet<HostVolume> {
        &self.host_volumes
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn links(&self) -> &BTreeSet<Link> {
        &self.links
    }

    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    pub fn map_exposed_ports(&self) -> bool {
        self.map_exposed_ports
    }

    pub fn port_map(&self) -> &BTreeSet<PortMapping> {
        &self.port_map
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOptions {
    DataVolume(DataVolumeOptions),
    Command(CommandOptions),
}

/// Immutable description of a container to start.
///
/// Only the builder returned by [`LaunchConfig::builder`] can produce one, so a value of
/// this type always carries a non-blank name and image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub(crate) name: String,
    pub(crate) image: String,
    pub(crate) options: LaunchOptions,
}

impl LaunchConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn kind(&self) -> ContainerKind {
        match self.options {
            LaunchOptions::DataVolume(_) => ContainerKind::DataVolume,
            LaunchOptions::Command(_) => ContainerKind::Command,
        }
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    pub fn command_options(&self) -> Option<&CommandOptions> {
        match &self.options {
            LaunchOptions::Command(opts) => Some(opts),
            LaunchOptions::DataVolume(_) => None,
        }
    }

    pub fn data_volume_options(&self) -> Option<&DataVolumeOptions> {
        match &self.options {
            LaunchOptions::DataVolume(opts) => Some(opts),
            LaunchOptions::Command(_) => None,
        }
    }
}
