//! Metrics definitions for space reloading.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RELOAD_UPDATED: MetricDef = MetricDef {
    name: "reload.updated",
    metric_type: MetricType::Counter,
    description: "Number of reloads that published a new experiment space",
};

pub const RELOAD_UNCHANGED: MetricDef = MetricDef {
    name: "reload.unchanged",
    metric_type: MetricType::Counter,
    description: "Number of reloads skipped because the payload version was already active",
};

pub const RELOAD_ABSENT: MetricDef = MetricDef {
    name: "reload.absent",
    metric_type: MetricType::Counter,
    description: "Number of reloads skipped because the loader had no payload",
};

pub const RELOAD_FAILED: MetricDef = MetricDef {
    name: "reload.failed",
    metric_type: MetricType::Counter,
    description: "Number of reloads that failed to load or deserialize a payload",
};

pub const RELOAD_DURATION: MetricDef = MetricDef {
    name: "reload.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a reload attempt in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RELOAD_UPDATED,
    RELOAD_UNCHANGED,
    RELOAD_ABSENT,
    RELOAD_FAILED,
    RELOAD_DURATION,
];
