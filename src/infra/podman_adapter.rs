use crate::domain::{
    Container, ContainerEngine, ContainerStatus, LaunchConfig, LaunchOptions, Labels, Mode,
    PortMapping,
};
use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const CREATED_LABEL: &str = "fleetbox.created";

const PS_FORMAT: &str =
    "{{.ID}}\t{{.Names}}\t{{.State}}\t{{.Ports}}\t{{index .Labels \"fleetbox.created\"}}";

/// Drives a local `podman` (or `docker`, same CLI surface) binary.
#[derive(Debug, Clone)]
pub struct PodmanAdapter {
    binary: String,
}

impl PodmanAdapter {
    pub fn new() -> Self {
        Self::with_binary("podman")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn output<I, S>(&self, args: I, context: &str) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.binary)
            .args(args.into_iter().map(|item| item.as_ref().to_os_string()))
            .stdin(Stdio::null())
            .output()
            .with_context(|| context.to_string())?;

        if !output.status.success() {
            bail!(
                "{} retornou status {:?} ({context}): {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn ps(&self, filters: &[String], context: &str) -> Result<Vec<Container>> {
        let mut args: Vec<String> = vec!["ps".into(), "-a".into()];
        for filter in filters {
            args.push("--filter".into());
            args.push(filter.clone());
        }
        args.push("--format".into());
        args.push(PS_FORMAT.into());

        let stdout = self.output(&args, context)?;
        stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }
}

impl Default for PodmanAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerEngine for PodmanAdapter {
    fn launch(&self, config: &LaunchConfig, labels: &Labels) -> Result<Container> {
        let created_at = SystemTime::now();
        let mut labels = labels.clone();
        labels.insert(CREATED_LABEL.to_string(), unix_seconds(created_at).to_string());

        let args = launch_args(config, &labels);
        debug!("{} {}", self.binary, args.join(" "));

        let stdout = self.output(&args, &format!("criando container {}", config.name()))?;
        let id = stdout
            .lines()
            .last()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .with_context(|| format!("{} não retornou o id de {}", self.binary, config.name()))?;

        let status = match config.options() {
            LaunchOptions::DataVolume(_) => ContainerStatus::Pending,
            LaunchOptions::Command(_) => ContainerStatus::Running,
        };

        Ok(published_ports(config).into_iter().fold(
            Container::new(short_id(id), config.name())
                .with_status(status)
                .with_created_at(from_unix_seconds(unix_seconds(created_at))),
            |c, (container_port, host_port)| c.with_port(container_port, host_port),
        ))
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.output(["rm", "-f", id], &format!("removendo container {id}"))?;
        Ok(())
    }

    fn restart(&self, id: &str) -> Result<Container> {
        self.output(["restart", id], &format!("reiniciando container {id}"))?;

        self.ps(&[format!("id={id}")], &format!("inspecionando container {id}"))?
            .into_iter()
            .next()
            .with_context(|| format!("container {id} sumiu após restart"))
    }

    fn list(&self, labels: &Labels) -> Result<Vec<Container>> {
        let filters: Vec<String> = labels
            .iter()
            .map(|(k, v)| format!("label={k}={v}"))
            .collect();
        self.ps(&filters, "listando containers")
    }

    fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Arguments for `run` (command containers) or `create` (data volumes).
pub fn launch_args(config: &LaunchConfig, labels: &Labels) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match config.options() {
        LaunchOptions::DataVolume(opts) => {
            args.extend(["create", "--name", config.name()].map(String::from));
            for volume in opts.volumes() {
                args.push("-v".into());
                args.push(volume.clone());
            }
            push_labels(&mut args, labels);
            args.push(config.image().into());
        }
        LaunchOptions::Command(opts) => {
            args.extend(["run", "-d", "--name", config.name()].map(String::from));
            if opts.mode() == Some(Mode::Cleanup) {
                args.push("--rm".into());
            }
            for data_volume in opts.data_volume_containers() {
                args.push("--volumes-from".into());
                args.push(data_volume.clone());
            }
            for volume in opts.host_volumes() {
                args.push("-v".into());
                args.push(format!("{}:{}", volume.host_path, volume.container_path));
            }
            for (key, value) in opts.env() {
                args.push("-e".into());
                args.push(format!("{key}={value}"));
            }
            for link in opts.links() {
                args.push("--link".into());
                args.push(format!("{}:{}", link.name, link.alias));
            }
            for mapping in opts.port_map() {
                args.push("-p".into());
                args.push(mapping.to_string());
            }
            if opts.map_exposed_ports() {
                args.push("-P".into());
            }
            push_labels(&mut args, labels);
            args.push(config.image().into());

            if let Some(command) = opts.command() {
                args.push(command.program.clone());
                args.extend(command.args.iter().cloned());
            }
        }
    }

    args
}

fn push_labels(args: &mut Vec<String>, labels: &Labels) {
    for (key, value) in labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }
}

/// Container port to host port for every explicit mapping, ranges expanded.
fn published_ports(config: &LaunchConfig) -> BTreeMap<u16, u16> {
    let mut ports = BTreeMap::new();
    let Some(opts) = config.command_options() else {
        return ports;
    };

    for mapping in opts.port_map() {
        match mapping {
            PortMapping::Single { host, container } => {
                ports.insert(*container, *host);
            }
            PortMapping::Range { host, container } => {
                for offset in 0..=container.span() {
                    ports.insert(container.begin() + offset, host.begin() + offset);
                }
            }
        }
    }
    ports
}

fn parse_ps_line(line: &str) -> Result<Container> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [id, names, state, rest @ ..] = fields.as_slice() else {
        bail!("saída inesperada do ps: {line:?}");
    };

    let name = names.split(',').next().unwrap_or(*names).trim();
    let ports = rest.first().map(|p| parse_ports(p)).unwrap_or_default();
    let created_at = rest
        .get(1)
        .and_then(|secs| secs.trim().parse::<u64>().ok())
        .map(from_unix_seconds);

    let container = ports.into_iter().fold(
        Container::new(short_id(id.trim()), name).with_status(parse_state(state)),
        |c, (container_port, host_port)| c.with_port(container_port, host_port),
    );
    Ok(match created_at {
        Some(created_at) => container.with_created_at(created_at),
        None => container,
    })
}

fn parse_state(state: &str) -> ContainerStatus {
    let state = state.trim().to_ascii_lowercase();
    let word = state.split_whitespace().next().unwrap_or("");
    match word {
        "running" | "up" | "paused" | "restarting" => ContainerStatus::Running,
        "exited" | "stopped" | "removing" => ContainerStatus::Stopped,
        "dead" | "error" => ContainerStatus::Failed,
        _ => ContainerStatus::Pending,
    }
}

/// Parses the `Ports` column, e.g. `0.0.0.0:8080->80/tcp, 0.0.0.0:8000-8001->8000-8001/tcp`,
/// into container port to host port. Exposed but unpublished ports are skipped.
pub fn parse_ports(column: &str) -> BTreeMap<u16, u16> {
    let mut ports = BTreeMap::new();

    for entry in column.split(',').map(str::trim) {
        let Some((host, container)) = entry.split_once("->") else {
            continue;
        };
        let host = host.rsplit(':').next().unwrap_or(host);
        let container = container.split('/').next().unwrap_or(container);

        let (Some(host), Some(container)) = (port_bounds(host), port_bounds(container)) else {
            continue;
        };
        if host.1 - host.0 != container.1 - container.0 {
            continue;
        }
        for offset in 0..=(container.1 - container.0) {
            ports.insert(container.0 + offset, host.0 + offset);
        }
    }

    ports
}

fn port_bounds(s: &str) -> Option<(u16, u16)> {
    match s.split_once('-') {
        Some((begin, end)) => {
            let (begin, end) = (begin.parse().ok()?, end.parse().ok()?);
            (begin <= end).then_some((begin, end))
        }
        None => s.parse().ok().map(|port| (port, port)),
    }
}

/// Ids are kept in the 12 character form `ps` prints, so launch and list agree.
fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn from_unix_seconds(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}
