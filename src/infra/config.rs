use crate::domain::{ContainerKind, LaunchConfig, Mode, PortMapping, ProviderSpec};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_FLEET_TOML_NAME: &str = "fleet.toml";

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/root"))
        .join(".config/fleetbox")
}

/// Which CLI a provider shells out to.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Podman,
    Docker,
}

impl BackendKind {
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Podman => "podman",
            Self::Docker => "docker",
        }
    }
}

/// A provider declared as `[providers.NAME]`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    #[serde(default)]
    pub backend: BackendKind,
    pub template_tag: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// `<n>s`, `<n>m` or `<n>h`.
    pub ttl: Option<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

fn default_pool_size() -> usize {
    1
}

fn default_hostname() -> String {
    "localhost".to_string()
}

impl ProviderSettings {
    pub fn to_spec(&self, name: &str) -> Result<ProviderSpec> {
        validate_name("provider", name)?;

        if self.template_tag.trim().is_empty() {
            bail!("Provider '{}' sem campo 'template_tag'", name);
        }
        if self.pool_size == 0 {
            bail!("Provider '{}' precisa de pool_size maior que zero", name);
        }

        let mut spec = ProviderSpec::new(name, self.template_tag.trim())
            .pool_size(self.pool_size)
            .priority(self.priority);
        if let Some(ttl) = &self.ttl {
            let ttl = parse_duration(ttl).with_context(|| format!("ttl do provider '{name}'"))?;
            spec = spec.ttl(ttl);
        }
        Ok(spec)
    }
}

/// A container template declared as `[launch.NAME]`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LaunchDefinition {
    #[serde(default = "default_kind")]
    pub kind: ContainerKind,
    pub image: String,
    pub mode: Option<Mode>,
    /// `KEY=VALUE` entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// `HOST:CONTAINER`, single ports or ranges.
    #[serde(default)]
    pub ports: Vec<String>,
    /// `HOST_PATH:CONTAINER_PATH`, host paths are shell-expanded.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub volumes_from: Vec<String>,
    /// `NAME:ALIAS`, or just `NAME` to use the name as alias.
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub map_exposed_ports: bool,
    /// Container paths owned by a data-volume container.
    #[serde(default)]
    pub mounts: Vec<String>,
}

fn default_kind() -> ContainerKind {
    ContainerKind::Command
}

impl LaunchDefinition {
    /// Runs the definition through the config builder, so it is rejected exactly like a
    /// config assembled in code.
    pub fn to_launch_config(&self, name: &str) -> Result<LaunchConfig> {
        validate_name("launch", name)?;
        let base = LaunchConfig::builder().name(name).image(self.image.trim());

        match self.kind {
            ContainerKind::DataVolume => {
                self.reject_command_fields(name)?;
                let mut builder = base.to_data_volume_container()?;
                for mount in &self.mounts {
                    builder.add_volume(mount.trim());
                }
                Ok(builder.build())
            }
            ContainerKind::Command => {
                if !self.mounts.is_empty() {
                    bail!("Launch '{}': 'mounts' só vale para kind = \"data-volume\"", name);
                }
                let mut builder = base.to_command_container()?;

                if let Some(mode) = self.mode {
                    builder.set_mode(mode);
                }
                for entry in &self.env {
                    let (key, value) = entry
                        .split_once('=')
                        .with_context(|| format!("Launch '{name}': env '{entry}' deve ser KEY=VALUE"))?;
                    builder.add_env_variable(key.trim(), value);
                }
                for port in &self.ports {
                    let mapping: PortMapping = port
                        .parse()
                        .with_context(|| format!("Launch '{name}': porta '{port}'"))?;
                    builder.add_port_mapping(mapping);
                }
                for volume in &self.volumes {
                    let (host, container) = volume.split_once(':').with_context(|| {
                        format!("Launch '{name}': volume '{volume}' deve ser HOST:CONTAINER")
                    })?;
                    let host = shellexpand::tilde(host.trim()).into_owned();
                    builder.bind_host_volume(host, container.trim());
                }
                for data_volume in &self.volumes_from {
                    builder.bind_data_volume_container(data_volume.trim());
                }
                for link in &self.links {
                    let (container, alias) = link.split_once(':').unwrap_or((link.as_str(), link.as_str()));
                    builder.link_container(container.trim(), alias.trim());
                }
                if let Some((program, args)) = self.command.split_first() {
                    builder.set_command(program.clone(), args.iter().cloned())?;
                }
                builder.set_map_exposed_ports(self.map_exposed_ports);

                Ok(builder.build())
            }
        }
    }

    fn reject_command_fields(&self, name: &str) -> Result<()> {
        let set = [
            ("mode", self.mode.is_some()),
            ("env", !self.env.is_empty()),
            ("ports", !self.ports.is_empty()),
            ("volumes", !self.volumes.is_empty()),
            ("volumes_from", !self.volumes_from.is_empty()),
            ("links", !self.links.is_empty()),
            ("command", !self.command.is_empty()),
            ("map_exposed_ports", self.map_exposed_ports),
        ];
        if let Some((field, _)) = set.iter().find(|(_, present)| *present) {
            bail!(
                "Launch '{}': '{}' não vale para kind = \"data-volume\"",
                name,
                field
            );
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct FleetConfig {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    pub launch: BTreeMap<String, LaunchDefinition>,
}

impl FleetConfig {
    /// Entries of `other` replace entries of `self` with the same name.
    pub fn merge(&mut self, other: FleetConfig) {
        self.providers.extend(other.providers);
        self.launch.extend(other.launch);
    }

    pub fn provider_specs(&self) -> Result<Vec<(ProviderSpec, &ProviderSettings)>> {
        self.providers
            .iter()
            .map(|(name, settings)| Ok((settings.to_spec(name)?, settings)))
            .collect()
    }

    pub fn launch_config(&self, name: &str) -> Result<LaunchConfig> {
        let Some(definition) = self.launch.get(name) else {
            bail!("Launch '{}' não está definido em {}", name, DEFAULT_FLEET_TOML_NAME);
        };
        definition.to_launch_config(name)
    }

    /// Converts every launch definition, failing on the first invalid one.
    pub fn launch_configs(&self) -> Result<Vec<LaunchConfig>> {
        self.launch
            .iter()
            .map(|(name, definition)| definition.to_launch_config(name))
            .collect()
    }
}

/// Container name restrictions, shared by provider and launch names.
fn validate_name(what: &str, name: &str) -> Result<()> {
    let Some(first_char) = name.chars().next() else {
        bail!("Nome de {} vazio encontrado", what);
    };
    if !first_char.is_ascii_alphanumeric() {
        bail!("Nome de {} '{}' deve começar com letra ou número", what, name);
    }
    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '.' | '-'))
    {
        bail!("Nome de {} '{}' contém caractere inválido '{}'", what, name, c);
    }
    Ok(())
}

fn read_fleet_toml(path: &Path, scope: &str) -> Result<Option<FleetConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("lendo config {scope} em {:?}", path))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("parse de config {scope} em {:?}", path))?;
    debug!("Config {} carregada de {:?}", scope, path);
    Ok(Some(config))
}

/// Loads `fleet.toml` from `config_dir`, then merges `./fleet.toml` over it.
pub fn load_fleet_config(config_dir: &Path) -> Result<FleetConfig> {
    load_fleet_config_from(config_dir, Path::new("./"))
}

pub fn load_fleet_config_from(config_dir: &Path, local_dir: &Path) -> Result<FleetConfig> {
    let mut config =
        read_fleet_toml(&config_dir.join(DEFAULT_FLEET_TOML_NAME), "global")?.unwrap_or_default();

    if let Some(local) = read_fleet_toml(&local_dir.join(DEFAULT_FLEET_TOML_NAME), "local")? {
        config.merge(local);
    }

    info!(
        "{} provider(s) e {} launch(es) configurados",
        config.providers.len(),
        config.launch.len()
    );
    Ok(config)
}

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (digits, unit_secs) = if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 60 * 60)
    } else {
        bail!("Formato de duração inválido: {}", s);
    };

    let value: u64 = digits
        .parse()
        .with_context(|| format!("Formato de duração inválido: {}", s))?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .with_context(|| format!("Duração grande demais: {}", s))
}
