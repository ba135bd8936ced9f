//! Phased construction of [`LaunchConfig`] values.
//!
//! ```
//! use fleetbox::domain::{LaunchConfig, Mode};
//!
//! let mut web = LaunchConfig::builder()
//!     .name("my-webapp")
//!     .image("dma-engine")
//!     .to_command_container()?;
//! web.bind_data_volume_container("my-volume")
//!     .link_container("my-db", "dma-db")
//!     .set_mode(Mode::Detached);
//! web.map_port_range_to_host("8000-8005", "8000-8005")?;
//! let config = web.build();
//! assert_eq!(config.name(), "my-webapp");
//! # Ok::<(), fleetbox::ConfigError>(())
//! ```

use super::launch::{
    Command, CommandOptions, DataVolumeOptions, HostVolume, LaunchConfig, LaunchOptions, Link,
    Mode, PortMapping, PortRange, validate_port,
};
use crate::error::ConfigError;
use tracing::debug;

impl LaunchConfig {
    /// Starts a new builder. Name and image must be set before choosing a kind.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// First phase: identity of the container.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    name: Option<String>,
    image: Option<String>,
}

/// Name and image that passed validation. Only [`ConfigBuilder::commit`] creates one.
#[derive(Debug, Clone)]
struct Committed {
    name: String,
    image: String,
}

impl ConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn to_command_container(self) -> Result<CommandBuilder, ConfigError> {
        Ok(CommandBuilder {
            identity: self.commit()?,
            options: CommandOptions::default(),
        })
    }

    pub fn to_data_volume_container(self) -> Result<DataVolumeBuilder, ConfigError> {
        Ok(DataVolumeBuilder {
            identity: self.commit()?,
            options: DataVolumeOptions::default(),
        })
    }

    fn commit(self) -> Result<Committed, ConfigError> {
        let is_blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());

        let mut missing = Vec::new();
        if is_blank(&self.name) {
            missing.push("name");
        }
        if is_blank(&self.image) {
            missing.push("image");
        }

        match (self.name, self.image) {
            (Some(name), Some(image)) if missing.is_empty() => Ok(Committed { name, image }),
            _ => Err(ConfigError::MissingFields(missing)),
        }
    }
}

/// Builds a data-volume container: storage paths other containers can mount.
#[derive(Debug, Clone)]
pub struct DataVolumeBuilder {
    identity: Committed,
    options: DataVolumeOptions,
}

impl DataVolumeBuilder {
    pub fn add_volume(&mut self, path: impl Into<String>) -> &mut Self {
        self.options.volumes.insert(path.into());
        self
    }

    pub fn build(self) -> LaunchConfig {
        LaunchConfig {
            name: self.identity.name,
            image: self.identity.image,
            options: LaunchOptions::DataVolume(self.options),
        }
    }
}

/// Builds a command container.
///
/// Infallible setters return `&mut Self`; validating setters return a `Result` and leave
/// the builder untouched when they fail.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    identity: Committed,
    options: CommandOptions,
}

impl CommandBuilder {
    pub fn bind_data_volume_container(&mut self, name: impl Into<String>) -> &mut Self {
        self.options.data_volume_containers.insert(name.into());
        self
    }

    pub fn bind_host_volume(
        &mut self,
        host_path: impl Into<String>,
        container_path: impl Into<String>,
    ) -> &mut Self {
        self.options.host_volumes.insert(HostVolume {
            host_path: host_path.into(),
            container_path: container_path.into(),
        });
        self
    }

    /// Keys are unique; adding an existing key replaces its value.
    pub fn add_env_variable(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        if let Some(previous) = self.options.env.insert(key.clone(), value.into()) {
            debug!("Replacing env variable {key} (was {previous:?})");
        }
        self
    }

    pub fn set_mode(&mut self, mode: Mode) -> &mut Self {
        self.options.mode = Some(mode);
        self
    }

    pub fn link_container(&mut self, name: impl Into<String>, alias: impl Into<String>) -> &mut Self {
        self.options.links.insert(Link {
            name: name.into(),
            alias: alias.into(),
        });
        self
    }

    /// Sets the main command. A second call fails and keeps the first command.
    pub fn set_command<I, S>(&mut self, program: impl Into<String>, args: I) -> Result<&mut Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.options.command.is_some() {
            return Err(ConfigError::DuplicateCommand);
        }
        self.options.command = Some(Command {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        });
        Ok(self)
    }

    pub fn set_map_exposed_ports(&mut self, map: bool) -> &mut Self {
        self.options.map_exposed_ports = map;
        self
    }

    pub fn map_port_to_host(&mut self, host_port: u16, container_port: u16) -> Result<&mut Self, ConfigError> {
        let host = validate_port(u64::from(host_port))?;
        let container = validate_port(u64::from(container_port))?;
        self.options
            .port_map
            .insert(PortMapping::Single { host, container });
        Ok(self)
    }

    pub fn map_port_range_to_host(
        &mut self,
        host_range: &str,
        container_range: &str,
    ) -> Result<&mut Self, ConfigError> {
        let (host, container) = PortRange::pair(host_range, container_range)?;
        self.options
            .port_map
            .insert(PortMapping::Range { host, container });
        Ok(self)
    }

    /// Adds an already validated mapping, as produced by parsing `HOST:CONTAINER`.
    pub fn add_port_mapping(&mut self, mapping: PortMapping) -> &mut Self {
        self.options.port_map.insert(mapping);
        self
    }

    pub fn build(self) -> LaunchConfig {
        LaunchConfig {
            name: self.identity.name,
            image: self.identity.image,
            options: LaunchOptions::Command(self.options),
        }
    }
}
