//! The reconciliation controller: load, filter/transform, diff, dispatch.

use crate::worker::{self, JoinedError, Task};
use calendarsync_core::filter::Filter;
use calendarsync_core::model::semantically_equal;
use calendarsync_core::transform::{self, Transformer};
use calendarsync_core::{AdapterError, CalendarAdapter, Event, NamedComponent, Sink, Source, TransformError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("failed to get events in timeframe from source {name}: {source}")]
    LoadSource { name: String, #[source] source: AdapterError },

    #[error("failed to get events in timeframe from sink {name}: {source}")]
    LoadSink { name: String, #[source] source: AdapterError },

    #[error("failed to transform source event: {0}")]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Tasks(#[from] JoinedError),
}

/// Counts of what the last run did (or would have done, under `dry_run`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

pub struct Controller {
    source: Arc<dyn Source>,
    sink: Arc<dyn Sink>,
    filters: Vec<Box<dyn Filter>>,
    transformers: Vec<Box<dyn Transformer>>,
    concurrency: usize,
}

impl Controller {
    pub fn new(
        source: Arc<dyn Source>,
        sink: Arc<dyn Sink>,
        filters: Vec<Box<dyn Filter>>,
        transformers: Vec<Box<dyn Transformer>>,
    ) -> Self {
        Self { source, sink, filters, transformers, concurrency: 1 }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn load_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(Vec<Event>, Vec<Event>), ControllerError> {
        let source_events = self.source.events_in_timeframe(start, end).await.map_err(|source| {
            ControllerError::LoadSource { name: self.source.name().to_string(), source }
        })?;
        for event in &source_events {
            tracing::debug!(title = %event.title, start = %event.start_time, "source event loaded");
        }

        let sink_events = self.sink.events_in_timeframe(start, end).await.map_err(|source| {
            ControllerError::LoadSink { name: self.sink.name().to_string(), source }
        })?;
        for event in &sink_events {
            tracing::debug!(title = %event.title, start = %event.start_time, "sink event loaded");
        }

        Ok((source_events, sink_events))
    }

    /// Runs phases 1-4 against the given window. Returns the counts of
    /// what happened (or, under `dry_run`, what would have happened).
    pub async fn synchronise_timeframe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        dry_run: bool,
        cancellation: CancellationToken,
    ) -> Result<RunSummary, ControllerError> {
        let (source_events, sink_events) = self.load_events(start, end).await?;

        let mut transformed_source = Vec::with_capacity(source_events.len());
        for event in calendarsync_core::filter::apply_pipeline(&self.filters, source_events) {
            transformed_source.push(transform::apply_pipeline(&self.transformers, &event)?);
        }

        let (to_create, to_update, to_delete) = self.diff_events(transformed_source, sink_events);

        let summary = RunSummary {
            created: to_create.len(),
            updated: to_update.len(),
            deleted: to_delete.len(),
        };

        if dry_run {
            tracing::warn!(
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                "dry run, no changes will be executed"
            );
            return Ok(summary);
        }

        let mut tasks: Vec<Task> = Vec::with_capacity(to_delete.len() + to_create.len() + to_update.len());

        for event in to_delete {
            let sink = self.sink.clone();
            tasks.push(Box::pin(async move {
                sink.delete_event(&event).await.map_err(|err| {
                    anyhow::anyhow!("failed to delete event {}: {err}", event.short_title())
                })
            }));
        }

        for event in to_create {
            let sink = self.sink.clone();
            tasks.push(Box::pin(async move {
                sink.create_event(&event).await.map_err(|err| {
                    anyhow::anyhow!("failed to create event {}: {err}", event.short_title())
                })
            }));
        }

        for event in to_update {
            let sink = self.sink.clone();
            tasks.push(Box::pin(async move {
                sink.update_event(&event).await.map_err(|err| {
                    anyhow::anyhow!("failed to update event {}: {err}", event.short_title())
                })
            }));
        }

        worker::run(self.concurrency, tasks, cancellation).await?;
        Ok(summary)
    }

    /// Deletes every sink event owned by this source, ignoring the source side entirely.
    pub async fn clean_up(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancellation: CancellationToken,
    ) -> Result<RunSummary, ControllerError> {
        let sink_events = self.sink.events_in_timeframe(start, end).await.map_err(|source| {
            ControllerError::LoadSink { name: self.sink.name().to_string(), source }
        })?;

        let owned: Vec<Event> = sink_events
            .into_iter()
            .filter(|event| {
                event
                    .metadata
                    .as_ref()
                    .is_some_and(|m| m.source_id == self.source.calendar_fingerprint())
            })
            .collect();

        let summary = RunSummary { created: 0, updated: 0, deleted: owned.len() };

        let tasks: Vec<Task> = owned
            .into_iter()
            .map(|event| {
                let sink = self.sink.clone();
                Box::pin(async move {
                    sink.delete_event(&event).await.map_err(|err| {
                        anyhow::anyhow!("failed to delete event {}: {err}", event.short_title())
                    })
                }) as Task
            })
            .collect();

        worker::run(self.concurrency, tasks, cancellation).await?;
        Ok(summary)
    }

    /// Phase 3: builds `toCreate`, `toUpdate`, `toDelete` from the
    /// transformed source set and the raw sink set.
    fn diff_events(
        &self,
        source_events: Vec<Event>,
        sink_events: Vec<Event>,
    ) -> (Vec<Event>, Vec<Event>, Vec<Event>) {
        let sink_by_sync_id: HashMap<String, &Event> = sink_events
            .iter()
            .filter_map(|e| e.sync_id().map(|id| (id.as_str().to_string(), e)))
            .collect();
        let source_sync_ids: std::collections::HashSet<String> =
            source_events.iter().filter_map(|e| e.sync_id().map(|id| id.as_str().to_string())).collect();

        let mut to_create = Vec::new();
        let mut to_update = Vec::new();

        let sink_fingerprint = self.sink.calendar_fingerprint();
        let source_fingerprint = self.source.calendar_fingerprint();

        for event in &source_events {
            let Some(metadata) = &event.metadata else { continue };
            let sync_id = metadata.sync_id.as_str();

            match sink_by_sync_id.get(sync_id) {
                None => {
                    if metadata.source_id != sink_fingerprint {
                        tracing::info!(title = %event.title, "new event, needs sync");
                        to_create.push(event.clone());
                    } else {
                        tracing::debug!(
                            title = %event.title,
                            "event originated from this sink and was deleted there, not resurrecting"
                        );
                    }
                }
                Some(sink_event) => {
                    let sink_metadata = sink_event.metadata.as_ref().expect("present, it's the map key");
                    if sink_metadata.source_id != source_fingerprint {
                        tracing::info!(title = %sink_event.title, "event was not synced by this source adapter, skipping");
                    } else if !semantically_equal(event, sink_event) {
                        tracing::info!(title = %event.title, "event content changed, needs sync");
                        let mut updated = (*sink_event).clone();
                        updated.overwrite(event);
                        to_update.push(updated);
                    } else {
                        tracing::debug!(title = %sink_event.title, "event in sync");
                    }
                }
            }
        }

        let mut to_delete = Vec::new();
        for event in &sink_events {
            let Some(metadata) = &event.metadata else { continue };
            if source_sync_ids.contains(metadata.sync_id.as_str()) {
                continue;
            }

            if metadata.source_id.is_empty() {
                tracing::debug!(title = %event.title, "foreign event with empty SourceID, never deleting");
            } else if metadata.source_id == source_fingerprint {
                tracing::info!(title = %event.title, "sink event is no longer in source, marked for removal");
                to_delete.push(event.clone());
            } else {
                tracing::debug!(title = %event.title, "event not in source but owned by another source adapter, skipping");
            }
        }

        (to_create, to_update, to_delete)
    }
}
