use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use engine::condition::{
    ArityCondition, CacheLevel, Condition, ConditionError, ConditionRegistry, PropertyCondition,
};
use loader::Format;
use serde::Deserialize;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "divert".into()
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".into()
}

#[derive(Deserialize, Debug, Default)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct SpaceConfig {
    pub path: PathBuf,
    /// Derived from the file extension when unset.
    pub format: Option<Format>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

impl SpaceConfig {
    pub fn format(&self) -> Format {
        self.format.unwrap_or_else(|| Format::from_path(&self.path))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// A condition function offered to space documents.
///
/// With an `attribute` the function matches requests whose attribute is one
/// of its arguments. Without one it matches every request and only checks
/// the argument count.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ConditionConfig {
    pub name: String,
    pub attribute: Option<String>,
    #[serde(default)]
    pub min_args: usize,
    pub max_args: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub space: SpaceConfig,
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data: Config = serde_yaml::from_reader(file)?;
        data.validate()?;

        Ok(data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.space.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "space.poll_interval_secs must be positive".into(),
            ));
        }
        for condition in &self.conditions {
            if let Some(max_args) = condition.max_args
                && max_args < condition.min_args
            {
                return Err(ConfigError::Invalid(format!(
                    "condition {} accepts at most {max_args} but at least {} arguments",
                    condition.name, condition.min_args
                )));
            }
        }
        Ok(())
    }

    pub fn logging(&self) -> LoggingConfig {
        match &self.common.logging {
            Some(logging) => LoggingConfig {
                sentry_dsn: logging.sentry_dsn.clone(),
                level: logging.level.clone(),
            },
            None => LoggingConfig::default(),
        }
    }

    /// Builds the registry that space documents resolve condition names with.
    pub fn condition_registry(&self) -> Result<Arc<ConditionRegistry>, ConfigError> {
        let mut registry = ConditionRegistry::new();
        for condition in &self.conditions {
            let max_args = condition.max_args.unwrap_or(usize::MAX);
            match &condition.attribute {
                Some(attribute) => {
                    let attribute = attribute.clone();
                    registry.register(&condition.name, move || {
                        Box::new(PropertyCondition::new(attribute.clone(), CacheLevel::Request))
                            as Box<dyn Condition>
                    })?;
                }
                None => {
                    let min_args = condition.min_args;
                    registry.register(&condition.name, move || {
                        Box::new(ArityCondition::new(min_args, max_args)) as Box<dyn Condition>
                    })?;
                }
            }
        }
        Ok(Arc::new(registry))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid condition: {0}")]
    Condition(#[from] ConditionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::StaticContext;
    use engine::condition::ConditionFactory;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
                level: debug
            space:
                path: /etc/divert/space.json
                poll_interval_secs: 10
            conditions:
                - name: country
                  attribute: country
                - name: beta
                  min_args: 1
                  max_args: 2
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.common.metrics.as_ref().expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix, "divert");
        assert_eq!(config.logging().level, "debug");
        assert_eq!(config.space.format(), Format::Json);
        assert_eq!(config.space.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.conditions.len(), 2);
    }

    #[test]
    fn minimal_config() {
        let tmp = write_tmp_file("space:\n    path: space.yaml\n");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(config.common.metrics.is_none());
        assert_eq!(config.logging(), LoggingConfig::default());
        assert_eq!(config.space.format(), Format::Yaml);
        assert_eq!(config.space.poll_interval_secs, 30);
        assert!(config.conditions.is_empty());
    }

    #[test]
    fn explicit_format() {
        let tmp = write_tmp_file("space:\n    path: space.txt\n    format: json\n");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.space.format(), Format::Json);
    }

    #[test]
    fn invalid_config() {
        let tmp = write_tmp_file("space:\n    path: a.yaml\n    poll_interval_secs: 0\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Invalid(_))
        ));

        let tmp = write_tmp_file(
            "space: {path: a.yaml}\nconditions: [{name: x, min_args: 3, max_args: 1}]\n",
        );
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Invalid(_))
        ));

        let tmp = write_tmp_file("conditions: []\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn condition_registry() {
        let tmp = write_tmp_file(
            r#"
            space: {path: a.yaml}
            conditions:
                - {name: country, attribute: country}
                - {name: beta, min_args: 1, max_args: 1}
            "#,
        );
        let config = Config::from_file(tmp.path()).expect("load config");
        let registry = config.condition_registry().expect("registry");
        assert_eq!(registry.supported_names(), vec!["beta", "country"]);

        let country = registry.create("country", &["de".into()]).unwrap();
        assert!(country.evaluate(&StaticContext::new().with_attribute("country", "de")));
        assert!(!country.evaluate(&StaticContext::new()));

        assert!(registry.create("beta", &["a".into()]).is_ok());
        assert!(matches!(
            registry.create("beta", &[]),
            Err(ConditionError::Arity { actual: 0, .. })
        ));
    }

    #[test]
    fn duplicate_condition() {
        let tmp = write_tmp_file(
            "space: {path: a.yaml}\nconditions: [{name: beta}, {name: beta}]\n",
        );
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.condition_registry(),
            Err(ConfigError::Condition(ConditionError::Duplicate(_)))
        ));
    }
}
