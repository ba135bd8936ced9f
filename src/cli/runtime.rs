use crate::domain::{Container, ContainerEngine, Provider};
use crate::infra::config::{load_fleet_config, load_fleet_config_from};
use crate::infra::{BackendKind, FleetConfig, PodmanAdapter};
use crate::services::{EngineProvider, LeastLoadedStrategy, ProviderRegistry};
use anyhow::{Result, bail};
use clap::Subcommand;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

#[derive(Subcommand)]
pub enum FleetAction {
    /// Lista os providers configurados e sua ocupação
    Providers,
    /// Valida fleet.toml sem tocar em nenhum backend
    Validate,
    /// Inicia um ou mais launches definidos em fleet.toml
    Run {
        /// Nomes em [launch.NAME]; vários sobem juntos no mesmo provider
        #[arg(required = true)]
        launches: Vec<String>,
        /// Prefere o provider com mais vagas livres em vez da prioridade
        #[arg(long)]
        spread: bool,
    },
    /// Mostra os containers de cada provider
    Ps,
    /// Para e remove um container
    Stop { id: String },
    /// Reinicia um container
    Restart { id: String },
    /// Remove o container mais antigo de um provider
    Evict { provider: String },
    /// Remove containers que passaram do ttl do provider
    Reap,
}

pub struct Runtime {
    config_dir: PathBuf,
    config: FleetConfig,
    fleet: ProviderRegistry,
}

impl Runtime {
    pub fn new(config_dir: &Path) -> Result<Self> {
        let config = load_fleet_config(config_dir)?;
        let mut engines: HashMap<BackendKind, Arc<dyn ContainerEngine>> = HashMap::new();

        Self::from_config(config_dir, config, |backend| {
            engines
                .entry(backend)
                .or_insert_with(|| Arc::new(PodmanAdapter::with_binary(backend.binary())))
                .clone()
        })
    }

    /// Every provider shares `engine`, whatever backend it declares. Only
    /// `config_dir/fleet.toml` is read.
    pub fn with_engine(config_dir: &Path, engine: Arc<dyn ContainerEngine>) -> Result<Self> {
        let config = load_fleet_config_from(config_dir, config_dir)?;
        Self::from_config(config_dir, config, |_| engine.clone())
    }

    fn from_config(
        config_dir: &Path,
        config: FleetConfig,
        mut engine_for: impl FnMut(BackendKind) -> Arc<dyn ContainerEngine>,
    ) -> Result<Self> {
        let fleet = ProviderRegistry::default();

        for (spec, settings) in config.provider_specs()? {
            let provider = EngineProvider::new(
                spec,
                engine_for(settings.backend),
                settings.hostname.clone(),
            );
            if let Err(e) = provider.adopt_existing() {
                warn!("Provider {} indisponível: {:#}", provider.name(), e);
            }
            fleet.register(Arc::new(provider))?;
        }

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            config,
            fleet,
        })
    }

    pub fn fleet(&self) -> &ProviderRegistry {
        &self.fleet
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn list_providers(&self) {
        let providers = self.fleet.providers();
        if providers.is_empty() {
            println!("⚠️  Nenhum provider configurado em {:?}", self.config_dir);
            return;
        }

        println!("🖥️  Providers (ordem de preferência):");
        for provider in providers {
            let core = provider.core();
            println!(
                "- {:<12} | {:<7} | {:<12} | prioridade {} | {}/{} ativos | ttl {}s",
                provider.name(),
                provider.status(),
                provider.hostname(),
                provider.priority(),
                core.active_count(),
                core.pool_size(),
                core.ttl().as_secs()
            );
        }
    }

    pub fn validate(&self) -> Result<()> {
        let launches = self.config.launch_configs()?;
        println!(
            "✅ {} provider(s) e {} launch(es) válidos",
            self.fleet.providers().len(),
            launches.len()
        );
        for launch in launches {
            println!("- {:<12} | {:<11} | {}", launch.name(), launch.kind(), launch.image());
        }
        Ok(())
    }

    pub fn run_launches(&self, names: &[String]) -> Result<Vec<Arc<Container>>> {
        let mut configs = names
            .iter()
            .map(|name| self.config.launch_config(name))
            .collect::<Result<Vec<_>>>()?;

        let started = match configs.len() {
            0 => bail!("Nenhum launch informado"),
            1 => vec![self.fleet.start(configs.remove(0))?],
            _ => self.fleet.start_all(configs)?,
        };

        for container in &started {
            println!("🚀 {} iniciado ({})", container.name(), container.id());
        }
        Ok(started)
    }

    pub fn use_spread_strategy(&self) {
        self.fleet.set_strategy(Arc::new(LeastLoadedStrategy));
    }

    pub fn status(&self) -> Result<()> {
        let report = self.fleet.refresh_all();

        println!("📦 Containers:");
        for provider in self.fleet.providers() {
            let containers = provider.core().containers();
            println!(
                "{} ({}/{})",
                provider.name(),
                containers.len(),
                provider.core().pool_size()
            );
            for container in containers {
                let ports: Vec<String> = container
                    .ports()
                    .iter()
                    .map(|(c, h)| format!("{h}->{c}"))
                    .collect();
                println!(
                    "- {:<12} | {:<14} | {:<8} | {}",
                    container.id(),
                    container.name(),
                    container.status(),
                    ports.join(", ")
                );
            }
        }

        for (name, error) in &report.failed {
            println!("⚠️  {} não respondeu: {:#}", name, error);
        }
        Ok(())
    }

    pub fn stop(&self, id: &str) -> Result<()> {
        self.fleet.stop(id)?;
        println!("🛑 {} parado", id);
        Ok(())
    }

    pub fn restart(&self, id: &str) -> Result<()> {
        let container = self.fleet.restart(id)?;
        println!("🔄 {} reiniciado ({})", container.name(), container.status());
        Ok(())
    }

    pub fn evict(&self, provider: &str) -> Result<()> {
        match self.fleet.evict_oldest(provider)? {
            Some(container) => println!("🧹 {} removido de {}", container.id(), provider),
            None => println!("ℹ️  {} não tem containers", provider),
        }
        Ok(())
    }

    pub fn reap(&self) -> Vec<String> {
        let reaped = self.fleet.reap_expired(SystemTime::now());
        if reaped.is_empty() {
            println!("ℹ️  Nenhum container expirado");
        }
        for id in &reaped {
            println!("🧹 {} expirado e removido", id);
        }
        reaped
    }
}

pub fn run(action: FleetAction, config_dir: &Path) -> Result<()> {
    let runtime = Runtime::new(config_dir)?;

    match action {
        FleetAction::Providers => {
            runtime.list_providers();
            Ok(())
        }
        FleetAction::Validate => runtime.validate(),
        FleetAction::Run { launches, spread } => {
            if spread {
                runtime.use_spread_strategy();
            }
            runtime.run_launches(&launches).map(|_| ())
        }
        FleetAction::Ps => runtime.status(),
        FleetAction::Stop { id } => runtime.stop(&id),
        FleetAction::Restart { id } => runtime.restart(&id),
        FleetAction::Evict { provider } => runtime.evict(&provider),
        FleetAction::Reap => {
            runtime.reap();
            Ok(())
        }
    }
}
