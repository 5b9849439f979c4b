//! Metrics definitions for the diversion engine.

use shared::metrics_defs::{MetricDef, MetricType};

pub const DIVERSION_REQUESTS: MetricDef = MetricDef {
    name: "diversion.requests",
    metric_type: MetricType::Counter,
    description: "Number of requests diverted",
};

pub const DIVERSION_NONE: MetricDef = MetricDef {
    name: "diversion.none",
    metric_type: MetricType::Counter,
    description: "Number of diversions that added no segment id to the request",
};

pub const DIVERSION_ASSIGNMENTS: MetricDef = MetricDef {
    name: "diversion.assignments",
    metric_type: MetricType::Counter,
    description: "Number of requests diverted into a segment, labelled by segment id",
};

pub const DIVERSION_ERRORS: MetricDef = MetricDef {
    name: "diversion.errors",
    metric_type: MetricType::Counter,
    description: "Number of diversions aborted because a layer had several valid segments",
};

pub const SPACE_UPDATES: MetricDef = MetricDef {
    name: "space.updates",
    metric_type: MetricType::Counter,
    description: "Number of experiment spaces published",
};

pub const SEGMENTS_DISABLED: MetricDef = MetricDef {
    name: "space.segments.disabled",
    metric_type: MetricType::Counter,
    description: "Number of segments turned off through the kill switch",
};

pub const ALL_METRICS: &[MetricDef] = &[
    DIVERSION_REQUESTS,
    DIVERSION_NONE,
    DIVERSION_ASSIGNMENTS,
    DIVERSION_ERRORS,
    SPACE_UPDATES,
    SEGMENTS_DISABLED,
];
