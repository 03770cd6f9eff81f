use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::errors::ListenerExecutionError;
use crate::message::InboundMessage;
use crate::pipeline::context::ProcessingContext;

/// Hook run around the listener of every processing unit.
///
/// Interceptors run in registration order. `intercept` may replace the
/// messages handed to the next interceptor and to the listener; returning
/// `None` fails the unit. `after_processing` runs for every unit once the
/// outcome is known, success or not, and cannot change it.
#[async_trait]
pub trait MessageInterceptor: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn intercept(
        &self,
        messages: Vec<Arc<InboundMessage>>,
        _context: &mut ProcessingContext,
    ) -> Option<Vec<Arc<InboundMessage>>> {
        Some(messages)
    }

    async fn after_processing(
        &self,
        _messages: &[Arc<InboundMessage>],
        _error: Option<&ListenerExecutionError>,
        _context: &mut ProcessingContext,
    ) {
    }
}

/// Keeps in-flight messages hidden from other consumers while a slow
/// listener is still working on them.
///
/// Once a unit has been processing for `min_time_to_process`, its
/// visibility is extended by `extension`, and again every
/// `min_time_to_process` until processing finishes or the unit is deleted.
#[derive(Debug, Clone)]
pub struct VisibilityExtensionInterceptor {
    min_time_to_process: Duration,
    extension: Duration,
}

/// Background extension task of one unit; aborted when dropped.
struct VisibilityExtensionTask(JoinHandle<()>);

impl Drop for VisibilityExtensionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl VisibilityExtensionInterceptor {
    pub fn new(min_time_to_process: Duration, extension: Duration) -> Self {
        VisibilityExtensionInterceptor {
            min_time_to_process: min_time_to_process.max(Duration::from_millis(1)),
            extension,
        }
    }
}

#[async_trait]
impl MessageInterceptor for VisibilityExtensionInterceptor {
    fn name(&self) -> &'static str {
        "visibility-extension"
    }

    async fn intercept(
        &self,
        messages: Vec<Arc<InboundMessage>>,
        context: &mut ProcessingContext,
    ) -> Option<Vec<Arc<InboundMessage>>> {
        let visibility = context.visibility().clone();
        let acknowledgement = context.acknowledgement().clone();
        let queue = context.queue().name().to_string();
        let period = self.min_time_to_process;
        let extension = self.extension;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                // Deleted messages have no visibility left to extend.
                if acknowledgement.is_acknowledged() {
                    break;
                }
                match visibility.change_visibility(extension).await {
                    Ok(()) => tracing::debug!(queue = %queue, ?extension, "extended message visibility"),
                    Err(e) => tracing::warn!(queue = %queue, error = %e, "failed to extend message visibility"),
                }
            }
        });
        context.extensions_mut().insert(VisibilityExtensionTask(task));

        Some(messages)
    }

    async fn after_processing(
        &self,
        _messages: &[Arc<InboundMessage>],
        _error: Option<&ListenerExecutionError>,
        context: &mut ProcessingContext,
    ) {
        drop(context.extensions_mut().remove::<VisibilityExtensionTask>());
    }
}
