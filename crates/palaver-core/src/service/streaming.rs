//! Tracks the correspondence between an outbound request and the possibly
//! different identifiers carried by its streamed response chunks.

use crate::types::{ItemId, MessageId, ResponseId};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Alias record for the single tracked streaming turn.
#[derive(Debug, Clone)]
pub struct StreamingMeta {
    /// Canonical key: the transport-level response id, falling back to the
    /// original request id when chunks carry none.
    pub response_id: ResponseId,
    pub item_id: Option<ItemId>,
    pub request_id: MessageId,
    /// Id chunks may reference in place of the response id. Seeded with the
    /// previously processed id at track time, repointed to this turn's own
    /// id once it settles.
    pub processed_alias: Option<MessageId>,
    pub cancel: CancellationToken,
}

/// At most one streaming turn is tracked at a time, matching the queue's
/// single-flight invariant.
#[derive(Default)]
pub struct StreamingCoordinator {
    entry: Mutex<Option<StreamingMeta>>,
}

impl StreamingCoordinator {
    fn entry(&self) -> std::sync::MutexGuard<'_, Option<StreamingMeta>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begins tracking a streaming turn for `request_id`. Later chunk-driven
    /// finalize/cancel calls may reference any of the recorded aliases.
    pub fn track(
        &self,
        request_id: MessageId,
        cancel: CancellationToken,
        response_id: Option<ResponseId>,
        item_id: Option<ItemId>,
        last_processed: Option<MessageId>,
    ) {
        let canonical = response_id.unwrap_or_else(|| ResponseId::from(&request_id));
        *self.entry() = Some(StreamingMeta {
            response_id: canonical,
            item_id,
            request_id,
            processed_alias: last_processed,
            cancel,
        });
    }

    /// Normalizes an arbitrary incoming id (request id, response id, or item
    /// id) to the canonical streaming key.
    pub fn resolve_id(&self, id: &str) -> Option<ResponseId> {
        let entry = self.entry();
        let meta = entry.as_ref()?;
        let matches = meta.response_id.as_str() == id
            || meta.request_id.as_str() == id
            || meta.item_id.as_ref().is_some_and(|item| item.as_str() == id)
            || meta
                .processed_alias
                .as_ref()
                .is_some_and(|alias| alias.as_str() == id);
        matches.then(|| meta.response_id.clone())
    }

    /// Marks the tracked turn as processed: from here on, chunks referencing
    /// the processed id correlate to this turn, not to the one before it.
    pub fn record_processed(&self, request_id: &MessageId) {
        let mut entry = self.entry();
        if let Some(meta) = entry.as_mut() {
            if meta.request_id == *request_id {
                meta.processed_alias = Some(request_id.clone());
            }
        }
    }

    pub fn meta_for(&self, response_id: &ResponseId) -> Option<StreamingMeta> {
        self.entry()
            .as_ref()
            .filter(|meta| meta.response_id == *response_id)
            .cloned()
    }

    pub fn streaming_message_id(&self) -> Option<ResponseId> {
        self.entry().as_ref().map(|meta| meta.response_id.clone())
    }

    /// Removes tracking for any alias of `id` without advancing the queue;
    /// the caller decides separately whether to advance.
    pub fn clear(&self, id: &str) -> Option<StreamingMeta> {
        let canonical = self.resolve_id(id)?;
        let mut entry = self.entry();
        if entry
            .as_ref()
            .is_some_and(|meta| meta.response_id == canonical)
        {
            entry.take()
        } else {
            None
        }
    }

    pub fn clear_for_request(&self, request_id: &MessageId) -> Option<StreamingMeta> {
        let mut entry = self.entry();
        if entry
            .as_ref()
            .is_some_and(|meta| meta.request_id == *request_id)
        {
            entry.take()
        } else {
            None
        }
    }
}
