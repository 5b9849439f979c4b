use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use engine::space::{CriterionId, SegmentId};
use engine::{
    DiversionError, ExperimentHandler, ExperimentSpace, FlagRegistry, RequestState,
    StaticContext, Value,
};
use loader::{
    Command, DeserializeError, DocumentDeserializer, FileLoader, LoadError, Loader, Reloader,
    SpaceDeserializer,
};
use tokio::sync::mpsc;

use crate::config::{Config, ConfigError};

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("space is invalid: {0}")]
    Deserialize(#[from] DeserializeError),
    #[error("diversion failed: {0}")]
    Diversion(#[from] DiversionError),
    #[error("space file {0} does not exist")]
    MissingSpace(PathBuf),
    #[error("could not set up metrics: {0}")]
    Metrics(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
    #[error("could not wait for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
    #[error("reload worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// A synthetic request assembled from the command line.
#[derive(Debug, Default, Clone)]
pub struct RequestSpec {
    pub identifiers: Vec<(CriterionId, String)>,
    pub forced_ids: Vec<SegmentId>,
    pub request_time_msec: Option<i64>,
    pub attributes: Vec<(String, String)>,
}

impl RequestSpec {
    fn context(&self) -> StaticContext {
        let mut context = StaticContext::new().with_forced_ids(self.forced_ids.iter().copied());
        for (criterion_id, identifier) in &self.identifiers {
            context = context.with_identifier(*criterion_id, identifier.clone());
        }
        for (name, value) in &self.attributes {
            context = context.with_attribute(name.clone(), value.clone());
        }
        if let Some(request_time_msec) = self.request_time_msec {
            context = context.with_request_time(request_time_msec);
        }
        context
    }
}

pub struct SpaceSummary {
    pub version: String,
    pub criteria: usize,
    pub launch_layers: usize,
    pub permanent_layers: usize,
    pub segments: usize,
    pub flags: Vec<String>,
}

impl fmt::Display for SpaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version: {}", self.version)?;
        writeln!(f, "diversion criteria: {}", self.criteria)?;
        writeln!(
            f,
            "layers: {} launch, {} permanent",
            self.launch_layers, self.permanent_layers
        )?;
        writeln!(f, "segments: {}", self.segments)?;
        write!(f, "flags: {}", self.flags.join(", "))
    }
}

pub struct DivertReport {
    pub experiment_ids: Vec<SegmentId>,
    pub values: Vec<(String, Value)>,
}

impl fmt::Display for DivertReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.experiment_ids.iter().map(|id| id.to_string()).collect();
        write!(f, "experiments: [{}]", ids.join(", "))?;
        for (name, value) in &self.values {
            write!(f, "\n{name} = {value}")?;
        }
        Ok(())
    }
}

fn deserializer(config: &Config) -> Result<DocumentDeserializer, CliError> {
    Ok(DocumentDeserializer::new(
        config.space.format(),
        Arc::new(FlagRegistry::new()),
        config.condition_registry()?,
    ))
}

async fn load_space(config: &Config) -> Result<ExperimentSpace, CliError> {
    let loader = FileLoader::new(&config.space.path);
    let serialized = loader
        .get_serialized()
        .await?
        .ok_or_else(|| CliError::MissingSpace(config.space.path.clone()))?;
    Ok(deserializer(config)?.deserialize(&serialized)?)
}

/// Loads and validates the configured space.
pub async fn check(config: &Config) -> Result<SpaceSummary, CliError> {
    let space = load_space(config).await?;
    Ok(SpaceSummary {
        version: space.version_identifier().to_string(),
        criteria: space.criteria().len(),
        launch_layers: space.launch_layers().len(),
        permanent_layers: space.permanent_layers().len(),
        segments: space.segment_count(),
        flags: space.base_settings().flag_names().into_iter().collect(),
    })
}

/// Diverts one request through the configured space.
pub async fn divert(config: &Config, request: &RequestSpec) -> Result<DivertReport, CliError> {
    let space = load_space(config).await?;
    let names = space.base_settings().flag_names();
    let handler = ExperimentHandler::new(space);

    let mut state = RequestState::new(request.context());
    handler.handle(&mut state)?;

    let values = names
        .into_iter()
        .filter_map(|name| state.value(&name).map(|value| (name, value)))
        .collect();
    Ok(DivertReport {
        experiment_ids: state.experiment_ids().iter().copied().collect(),
        values,
    })
}

/// Keeps the configured space loaded until ctrl-c.
pub async fn watch(config: &Config) -> Result<(), CliError> {
    let reloader = Arc::new(Reloader::new(
        Arc::new(ExperimentHandler::default()),
        Arc::new(FileLoader::new(&config.space.path)),
        Arc::new(deserializer(config)?),
    ));
    let (tx, rx) = mpsc::channel(1);

    let interval = config.space.poll_interval();
    let worker = reloader.clone();
    let handle = tokio::spawn(async move { worker.run(interval, rx).await });

    tracing::info!(path = %config.space.path.display(), "Watching experiment space");
    tokio::signal::ctrl_c().await?;

    // The worker is gone already if the send fails.
    let _ = tx.send(Command::Shutdown).await;
    handle.await?;
    Ok(())
}
