use std::sync::Arc;
use std::time::{Duration, Instant};

use engine::ExperimentHandler;
use shared::{counter, histogram};
use tokio::sync::{Semaphore, TryAcquireError, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::deserializer::{DeserializeError, SpaceDeserializer};
use crate::loader::{LoadError, Loader};
use crate::metrics_defs::{
    RELOAD_ABSENT, RELOAD_DURATION, RELOAD_FAILED, RELOAD_UNCHANGED, RELOAD_UPDATED,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new space was published.
    Updated,
    /// The payload version is already active.
    Unchanged,
    /// The loader had nothing to offer.
    Absent,
}

#[derive(thiserror::Error, Debug)]
pub enum ReloadError {
    #[error("another reload is in progress")]
    Busy(#[from] TryAcquireError),

    #[error("loading failed: {0}")]
    Load(#[from] LoadError),

    #[error("version {version} was rejected: {source}")]
    Deserialize {
        version: String,
        source: DeserializeError,
    },
}

#[derive(Debug)]
pub enum Command {
    // Forces a reload outside of the normal interval. The worker replies when
    // the attempt finishes.
    Refresh(oneshot::Sender<Result<ReloadOutcome, ReloadError>>),
    Shutdown,
}

/// Moves payloads from a [`Loader`] into an [`ExperimentHandler`].
///
/// A payload only replaces the published space when it deserializes and
/// validates completely; any failure leaves the current space serving.
pub struct Reloader {
    handler: Arc<ExperimentHandler>,
    loader: Arc<dyn Loader>,
    deserializer: Arc<dyn SpaceDeserializer>,
    update_lock: Semaphore,
}

impl Reloader {
    pub fn new(
        handler: Arc<ExperimentHandler>,
        loader: Arc<dyn Loader>,
        deserializer: Arc<dyn SpaceDeserializer>,
    ) -> Self {
        Reloader {
            handler,
            loader,
            deserializer,
            update_lock: Semaphore::new(1),
        }
    }

    pub fn handler(&self) -> &Arc<ExperimentHandler> {
        &self.handler
    }

    /// Loads the current payload and publishes it if its version differs from
    /// the active one, or unconditionally when `force` is set.
    pub async fn reload(&self, force: bool) -> Result<ReloadOutcome, ReloadError> {
        // Held for the duration of the reload.
        let _permit = self.update_lock.try_acquire()?;

        let start = Instant::now();
        let result = self.reload_inner(force).await;
        histogram!(RELOAD_DURATION).record(start.elapsed().as_secs_f64());

        match &result {
            Ok(ReloadOutcome::Updated) => counter!(RELOAD_UPDATED).increment(1),
            Ok(ReloadOutcome::Unchanged) => counter!(RELOAD_UNCHANGED).increment(1),
            Ok(ReloadOutcome::Absent) => counter!(RELOAD_ABSENT).increment(1),
            Err(_) => counter!(RELOAD_FAILED).increment(1),
        }
        result
    }

    async fn reload_inner(&self, force: bool) -> Result<ReloadOutcome, ReloadError> {
        let Some(serialized) = self.loader.get_serialized().await? else {
            tracing::warn!("Loader returned no experiment space, skipping reload");
            return Ok(ReloadOutcome::Absent);
        };

        if !force && serialized.version == self.handler.version_identifier() {
            tracing::debug!(
                version = %serialized.version,
                "Experiment space version is already active, skipping reload"
            );
            return Ok(ReloadOutcome::Unchanged);
        }

        let space = self
            .deserializer
            .deserialize(&serialized)
            .map_err(|source| ReloadError::Deserialize {
                version: serialized.version.clone(),
                source,
            })?;
        self.handler.update(space);
        Ok(ReloadOutcome::Updated)
    }

    /// Performs a forced initial load, then reloads every `interval` and on
    /// demand until the Shutdown command is received or every sender is gone.
    pub async fn run(&self, interval: Duration, mut rx: mpsc::Receiver<Command>) {
        if let Err(err) = self.reload(true).await {
            tracing::error!(error = %err, "Initial experiment space load failed");
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reload(false).await {
                        Ok(ReloadOutcome::Updated) => tracing::info!(
                            version = %self.handler.version_identifier(),
                            "Reloaded experiment space"
                        ),
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "Experiment space reload failed"),
                    }
                }
                command = rx.recv() => match command {
                    Some(Command::Refresh(reply)) => {
                        let result = self.reload(true).await;
                        if let Err(err) = &result {
                            tracing::warn!(error = %err, "Requested experiment space reload failed");
                        }
                        if reply.send(result).is_err() {
                            tracing::debug!("Refresh requester went away before the reply");
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        tracing::info!("Reloader shutting down");
                        break;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use engine::condition::ConditionRegistry;
    use engine::{FlagRegistry, RequestState, StaticContext};

    use super::*;
    use crate::deserializer::{DocumentDeserializer, Format};
    use crate::loader::{Serialized, StaticLoader};

    const V1: &str = r#"
        flags: [{name: foo, type: int, base_value: 17}]
        diversions: [{id: 0, num_buckets: 100}]
        layers: [{id: 1, unbiased_id: 1, fixed_biased_id: 2, random_biased_id: 3}]
        experiments:
          - {id: 10, layer_id: 1, buckets: [82]}
    "#;

    const INVALID: &str = r#"
        flags: [{name: foo, type: int, base_value: 17}]
        diversions: [{id: 0, num_buckets: 100}]
        layers: [{id: 1, unbiased_id: 1, fixed_biased_id: 2, random_biased_id: 3}]
        experiments:
          - {id: 10, layer_id: 1, buckets: [82]}
          - {id: 11, layer_id: 1, buckets: [82]}
    "#;

    fn reloader(loader: Arc<StaticLoader>) -> Reloader {
        let deserializer = DocumentDeserializer::new(
            Format::Yaml,
            Arc::new(FlagRegistry::new()),
            Arc::new(ConditionRegistry::new()),
        );
        Reloader::new(
            Arc::new(ExperimentHandler::default()),
            loader,
            Arc::new(deserializer),
        )
    }

    fn payload(version: &str, yaml: &str) -> Option<Serialized> {
        Some(Serialized::single(version, yaml.to_string()))
    }

    #[tokio::test]
    async fn test_reload() {
        let loader = Arc::new(StaticLoader::default());
        let reloader = reloader(loader.clone());

        assert_eq!(reloader.reload(false).await.unwrap(), ReloadOutcome::Absent);
        assert_eq!(reloader.handler().version_identifier(), "");

        loader.set(payload("v1", V1));
        assert_eq!(reloader.reload(false).await.unwrap(), ReloadOutcome::Updated);
        assert_eq!(reloader.handler().version_identifier(), "v1");
        assert_eq!(reloader.reload(false).await.unwrap(), ReloadOutcome::Unchanged);
        assert_eq!(reloader.reload(true).await.unwrap(), ReloadOutcome::Updated);

        let mut state = RequestState::new(StaticContext::new().with_identifier(0, "cookie"));
        reloader.handler().handle(&mut state).unwrap();
        assert_eq!(state.experiment_ids(), &BTreeSet::from([10]));
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_current_space() {
        let loader = Arc::new(StaticLoader::new(payload("v1", V1)));
        let reloader = reloader(loader.clone());
        reloader.reload(false).await.unwrap();

        loader.set(payload("v2", INVALID));
        let err = reloader.reload(false).await.unwrap_err();
        assert!(matches!(err, ReloadError::Deserialize { ref version, .. } if version == "v2"));
        assert_eq!(reloader.handler().version_identifier(), "v1");

        // an absent payload does not unpublish anything either
        loader.set(None);
        assert_eq!(reloader.reload(true).await.unwrap(), ReloadOutcome::Absent);
        assert_eq!(reloader.handler().version_identifier(), "v1");
    }

    #[tokio::test]
    async fn test_concurrent_reload_is_rejected() {
        let reloader = reloader(Arc::new(StaticLoader::new(payload("v1", V1))));
        let _permit = reloader.update_lock.try_acquire().unwrap();
        assert!(matches!(
            reloader.reload(true).await,
            Err(ReloadError::Busy(_))
        ));
    }

    #[tokio::test]
    async fn test_run() {
        let loader = Arc::new(StaticLoader::new(payload("v1", V1)));
        let reloader = Arc::new(reloader(loader.clone()));
        let (tx, rx) = mpsc::channel(8);

        let worker = reloader.clone();
        let handle = tokio::spawn(async move { worker.run(Duration::from_secs(3600), rx).await });

        // the initial load runs before any command is served
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Refresh(reply_tx)).await.unwrap();
        assert_eq!(reply_rx.await.unwrap().unwrap(), ReloadOutcome::Updated);
        assert_eq!(reloader.handler().version_identifier(), "v1");

        loader.set(payload("v2", "flags: [{name: bar, type: bool, base_value: true}]"));
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Refresh(reply_tx)).await.unwrap();
        assert_eq!(reply_rx.await.unwrap().unwrap(), ReloadOutcome::Updated);
        assert_eq!(reloader.handler().version_identifier(), "v2");

        tx.send(Command::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls() {
        let loader = Arc::new(StaticLoader::new(payload("v1", V1)));
        let reloader = Arc::new(reloader(loader.clone()));
        let (tx, rx) = mpsc::channel(8);

        let worker = reloader.clone();
        let handle = tokio::spawn(async move { worker.run(Duration::from_secs(5), rx).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(reloader.handler().version_identifier(), "v1");

        loader.set(payload("v2", "flags: [{name: bar, type: bool, base_value: true}]"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reloader.handler().version_identifier(), "v2");

        drop(tx);
        handle.await.unwrap();
    }
}
