//! Metric name and label definitions.
//!
//! Every metric the relay emits is named here so dashboards have a single
//! place to look.

/// Inbound event handling
pub mod relay {
    /// Inbound message events received, by `kind` (created/updated/deleted)
    pub const EVENTS_TOTAL: &str = "rainbow_relay_events_total";
    /// Events dropped for one bridge by a filter, by `reason`
    pub const FILTERED_TOTAL: &str = "rainbow_relay_filtered_total";
    /// Origin messages currently tracked in the link store
    pub const LINKS_ACTIVE: &str = "rainbow_relay_links_active";
}

/// Outbound delivery
pub mod delivery {
    /// Delivery calls, by `operation` and `outcome`
    pub const CALLS_TOTAL: &str = "rainbow_delivery_calls_total";
    /// Delivery call duration in seconds, by `operation`
    pub const CALL_DURATION_SECONDS: &str = "rainbow_delivery_call_duration_seconds";
    /// Delivery targets created by the cache
    pub const TARGETS_CREATED_TOTAL: &str = "rainbow_delivery_targets_created_total";
}

/// Bridge registry
pub mod registry {
    /// Bridges with at least two endpoints after the last reload
    pub const BRIDGES_ACTIVE: &str = "rainbow_registry_bridges_active";
    /// Bridges stored but inert after the last reload
    pub const BRIDGES_INERT: &str = "rainbow_registry_bridges_inert";
    /// Channel entries dropped while normalizing configuration
    pub const CONFIG_ISSUES_TOTAL: &str = "rainbow_registry_config_issues_total";
    /// Completed registry reloads
    pub const RELOADS_TOTAL: &str = "rainbow_registry_reloads_total";
}

/// Common label keys
pub mod labels {
    pub const KIND: &str = "kind";
    pub const REASON: &str = "reason";
    pub const OPERATION: &str = "operation";
    pub const OUTCOME: &str = "outcome";
}
