//! Default [`TrafficHandler`] that emits log lines through `tracing`.

use tracing::{debug, Level};

use crate::{types::LogLine, TrafficHandler};

/// [`TrafficHandler`] that emits every line as a `DEBUG` event.
///
/// Capture only runs while `DEBUG` is enabled for this crate, so a service whose subscriber
/// filters this level out pays nothing beyond the check. A marked line carries a
/// `marker = "REQUEST"` or `marker = "RESPONSE"` field; every line carries its `correlation_id`.
///
/// # Examples
///
/// ```rust,no_run
/// use trafficlog::{LoggingHandler, TrafficLoggerConfig, TrafficLoggerLayer};
///
/// let layer = TrafficLoggerLayer::new(TrafficLoggerConfig::default(), LoggingHandler);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler;

impl TrafficHandler for LoggingHandler {
    fn is_enabled(&self) -> bool {
        tracing::enabled!(Level::DEBUG)
    }

    fn handle(&self, line: LogLine) {
        match line.marker {
            Some(marker) => debug!(
                marker = %marker,
                correlation_id = line.correlation_id,
                "{}",
                line.message
            ),
            None => debug!(correlation_id = line.correlation_id, "{}", line.message),
        }
    }
}
