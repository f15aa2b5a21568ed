//! Serve CLI command.

use crate::config::HttpSettings;
use crate::provider::ProviderClient;
use crate::trigger::{CronTrigger, serve_http};
use crate::Result;
use std::sync::Arc;

/// Runs the HTTP cron trigger until interrupted.
///
/// `port` overrides the configured listen port.
///
/// # Errors
///
/// Returns [`crate::Error::FeatureNotEnabled`] without the `http` feature,
/// or an error if the listener cannot be bound.
pub fn cmd_serve<P: ProviderClient + 'static>(
    trigger: Arc<CronTrigger<P>>,
    settings: &HttpSettings,
    port: Option<u16>,
) -> Result<()> {
    let mut settings = settings.clone();
    if let Some(port) = port {
        settings.port = port;
    }
    tracing::info!(
        port = settings.port,
        cadences = trigger.cadences().len(),
        "Starting cron trigger server"
    );
    serve_http(trigger, &settings)
}
