//! Metrics definitions for the dataflow catalog.

use shared::metrics_defs::{MetricDef, MetricType};

pub const DATAFLOW_CACHE_HIT: MetricDef = MetricDef {
    name: "dataflow_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of dataflow lookups answered by the cache",
};

pub const DATAFLOW_CACHE_MISS: MetricDef = MetricDef {
    name: "dataflow_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of dataflow lookups that went to the store",
};

pub const ALL_METRICS: &[MetricDef] = &[DATAFLOW_CACHE_HIT, DATAFLOW_CACHE_MISS];
