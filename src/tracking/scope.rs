use crate::tracking::service::ProgressHandle;
use tracing::debug;

/// Ties progress tracking to the lifetime of a view
///
/// `close` flushes every tracked video and waits for the flushes to land.
/// Dropping the scope without closing it still requests the flush, but cannot
/// wait for it.
pub struct TrackingScope {
    handle: ProgressHandle,
    closed: bool,
}

impl TrackingScope {
    pub fn new(handle: ProgressHandle) -> Self {
        Self {
            handle,
            closed: false,
        }
    }

    pub fn handle(&self) -> &ProgressHandle {
        &self.handle
    }

    pub async fn close(mut self) {
        self.closed = true;
        self.handle.flush_all().await;
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if !self.closed {
            debug!("TrackingScope dropped without close, requesting flush");
            self.handle.request_flush_all();
        }
    }
}
