use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_COUNT: MetricDef = MetricDef {
    name: "request.count",
    metric_type: MetricType::Counter,
    description: "Number of handled requests. Tagged with route, status.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, status.",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Outbound call duration in seconds. Tagged with service.",
};

pub const UPSTREAM_FAILURES: MetricDef = MetricDef {
    name: "upstream.failures",
    metric_type: MetricType::Counter,
    description: "Outbound calls that failed or returned an error status. Tagged with service.",
};

pub const VALIDATION_REJECTIONS: MetricDef = MetricDef {
    name: "validation.rejections",
    metric_type: MetricType::Counter,
    description: "Requests rejected by graph or dataflow validation. Tagged with field.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_COUNT,
    REQUEST_DURATION,
    UPSTREAM_DURATION,
    UPSTREAM_FAILURES,
    VALIDATION_REJECTIONS,
];
