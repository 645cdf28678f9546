//! Host and remote metric commands.

use std::collections::HashMap;

use crate::core::error::CoreResult;
use crate::core::metric_history::{MetricKind, MetricSample};
use crate::App;

/// Local host stats from the in-process provider.
pub fn get_system_stats(app: &App) -> HashMap<String, String> {
    app.local_stats.collect()
}

/// One collection pass over the session's monitoring side-channel.
/// Missing probes report `"unknown"`; the pass itself only fails when
/// no side-channel exists for the session.
pub async fn get_remote_system_stats(
    app: &App,
    session_id: &str,
) -> CoreResult<HashMap<String, String>> {
    app.monitor.collect(session_id).await
}

/// Recorded metric history for a session, one series per metric kind.
pub fn get_session_metric_history(
    app: &App,
    session_id: &str,
) -> HashMap<MetricKind, Vec<MetricSample>> {
    let mut series = HashMap::new();
    if let Some(history) = app.monitor.history(session_id) {
        for kind in MetricKind::ALL {
            series.insert(kind, history.samples(kind));
        }
    }
    series
}
