//! Scoped in-flight marker.
//!
//! A [`EncodeMarker`] owns one `current_encodes` row for the duration of an
//! encode. The row is removed by [`EncodeMarker::release`] on every normal
//! exit; if the guard is dropped without release (panic, cancelled task) the
//! removal is spawned onto the runtime instead.

use std::sync::Arc;

use tracing::{debug, warn};
use vstream_db::CoordinationStore;
use vstream_models::{MarkerId, VariantId};

use crate::error::WorkerResult;

pub struct EncodeMarker {
    store: Arc<dyn CoordinationStore>,
    pending: Option<MarkerId>,
    marker_id: MarkerId,
}

impl EncodeMarker {
    /// Insert a marker for `variant_id`.
    pub async fn acquire(
        store: Arc<dyn CoordinationStore>,
        variant_id: VariantId,
    ) -> WorkerResult<Self> {
        let marker = store.create_marker(variant_id).await?;
        debug!(marker_id = %marker.id, variant_id = %variant_id, "Encode marker created");
        Ok(Self {
            store,
            pending: Some(marker.id),
            marker_id: marker.id,
        })
    }

    pub fn id(&self) -> MarkerId {
        self.marker_id
    }

    /// Delete the marker. A marker already removed by a settling transaction
    /// is not an error. Failures are logged; recovery will find the row.
    pub async fn release(mut self) {
        if let Some(id) = self.pending.take() {
            match self.store.delete_marker(id).await {
                Ok(removed) => debug!(marker_id = %id, removed, "Encode marker released"),
                Err(e) => warn!(marker_id = %id, error = %e, "Failed to release encode marker"),
            }
        }
    }
}

impl Drop for EncodeMarker {
    fn drop(&mut self) {
        let Some(id) = self.pending.take() else {
            return;
        };
        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.delete_marker(id).await {
                        warn!(marker_id = %id, error = %e, "Failed to release dropped encode marker");
                    }
                });
            }
            Err(_) => warn!(marker_id = %id, "Encode marker dropped outside a runtime"),
        }
    }
}
