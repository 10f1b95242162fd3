//! Dispatch inbound lifecycle messages into the tracker

use std::sync::Arc;

use crate::error::Result;
use crate::providers::NotificationBus;
use crate::tracking::{InitializeOutcome, NewVersion, ProgressOutcome, VersionTracker};
use crate::types::{
    BatchReport, DomainNotification, InboundMessage, LifecycleMessage, MessageOutcome,
    MessageResult,
};

/// Replays lifecycle messages into the [`VersionTracker`] and republishes
/// the resulting state changes as domain notifications.
///
/// Holds no per-message state: replays are absorbed by the tracker's
/// conditional updates.
pub struct NotificationRelay {
    tracker: Arc<VersionTracker>,
    bus: Arc<dyn NotificationBus>,
}

/// What one message did, before it is turned into a [`MessageResult`]
struct Handled {
    outcome: MessageOutcome,
    document_id: Option<String>,
    notifications: Vec<DomainNotification>,
    note: Option<String>,
}

impl Handled {
    fn new(outcome: MessageOutcome, document_id: impl Into<String>) -> Self {
        Self {
            outcome,
            document_id: Some(document_id.into()),
            notifications: Vec::new(),
            note: None,
        }
    }
}

impl NotificationRelay {
    pub fn new(tracker: Arc<VersionTracker>, bus: Arc<dyn NotificationBus>) -> Self {
        Self { tracker, bus }
    }

    pub fn tracker(&self) -> &Arc<VersionTracker> {
        &self.tracker
    }

    /// Process a batch. Each message succeeds or fails on its own; the
    /// report is always returned.
    pub async fn process_batch(&self, messages: Vec<InboundMessage>) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, message) in messages.into_iter().enumerate() {
            let result = self.process_one(index, message).await;
            report.push(result);
        }

        tracing::info!(
            "Relay batch: {} processed, {} succeeded, {} failed",
            report.processed,
            report.succeeded,
            report.failed
        );
        report
    }

    /// Process a single message
    pub async fn process_one(&self, index: usize, message: InboundMessage) -> MessageResult {
        let handled = LifecycleMessage::parse(&message).and_then(|parsed| self.apply(parsed));

        match handled {
            Ok(handled) => {
                for notification in &handled.notifications {
                    self.publish(notification).await;
                }
                MessageResult {
                    index,
                    message_id: message.message_id,
                    subject: message.subject,
                    outcome: handled.outcome,
                    document_id: handled.document_id,
                    error: handled.note,
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Message {} ({}) failed: {}",
                    index,
                    message.subject,
                    err
                );
                MessageResult {
                    index,
                    message_id: message.message_id,
                    subject: message.subject,
                    outcome: MessageOutcome::Failed,
                    document_id: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Repair a drifted counter with an absolute count and publish the
    /// resulting progress
    pub async fn reconcile_progress(
        &self,
        document_id: &str,
        indexed_units: u32,
    ) -> Result<ProgressOutcome> {
        let outcome = self.tracker.reconcile_progress(document_id, indexed_units)?;
        let handled = progressed(document_id.to_string(), outcome.clone());
        for notification in &handled.notifications {
            self.publish(notification).await;
        }
        Ok(outcome)
    }

    fn apply(&self, message: LifecycleMessage) -> Result<Handled> {
        match message {
            LifecycleMessage::Started(payload) => {
                let mut request = NewVersion::new(
                    payload.base_document_id,
                    payload.document_name,
                    payload.total_units,
                );
                request.document_version = payload.document_version;
                request.upload_timestamp = payload.upload_timestamp;

                let outcome = self.tracker.initialize(request)?;
                Ok(started(outcome))
            }
            LifecycleMessage::UnitIndexed(payload) => {
                if let Some(progress) = &payload.progress {
                    tracing::debug!(
                        "Unit {:?} of {} indexed (producer reports {})",
                        payload.unit_index,
                        payload.document_id,
                        progress
                    );
                }
                let outcome = self.tracker.record_unit_indexed(&payload.document_id)?;
                Ok(progressed(payload.document_id, outcome))
            }
            LifecycleMessage::Completed(payload) => {
                let outcome = self.tracker.confirm_completion(&payload.document_id)?;
                Ok(progressed(payload.document_id, outcome))
            }
            LifecycleMessage::Unrecognized(subject) => {
                tracing::info!("Ignoring message with unknown subject '{}'", subject);
                Ok(Handled {
                    outcome: MessageOutcome::Ignored,
                    document_id: None,
                    notifications: Vec::new(),
                    note: None,
                })
            }
        }
    }

    /// Publish failures are logged only; the tracker state is already committed
    async fn publish(&self, notification: &DomainNotification) {
        if let Err(e) = self.bus.publish(notification).await {
            tracing::warn!(
                "Failed to publish {} for {} on {}: {}",
                notification.subject(),
                notification.document_id(),
                self.bus.name(),
                e
            );
        }
    }
}

fn started(outcome: InitializeOutcome) -> Handled {
    let record = outcome.record;
    if !outcome.created {
        return Handled::new(MessageOutcome::Duplicate, record.document_id);
    }

    let mut notifications: Vec<DomainNotification> = outcome
        .superseded
        .iter()
        .map(|old| DomainNotification::DocumentSuperseded {
            document_id: old.document_id.clone(),
            base_document_id: old.base_document_id.clone(),
            superseded_by: record.document_id.clone(),
        })
        .collect();
    if !record.status.is_terminal() || record.total_units == 0 {
        notifications.push(DomainNotification::started(&record));
    }
    notifications.extend(DomainNotification::completed(&record));

    let mut handled = Handled::new(MessageOutcome::Applied, record.document_id);
    handled.notifications = notifications;
    handled
}

fn progressed(document_id: String, outcome: ProgressOutcome) -> Handled {
    match outcome {
        ProgressOutcome::Applied {
            record,
            completed_now,
        } => {
            let mut handled = Handled::new(MessageOutcome::Applied, document_id);
            handled.notifications.push(DomainNotification::progress(&record));
            if completed_now {
                handled.notifications.extend(DomainNotification::completed(&record));
            }
            handled
        }
        ProgressOutcome::AlreadyAccounted { .. } => {
            Handled::new(MessageOutcome::Duplicate, document_id)
        }
        ProgressOutcome::NotReady {
            indexed_units,
            total_units,
            ..
        } => {
            let mut handled = Handled::new(MessageOutcome::Ignored, document_id);
            handled.note = Some(format!(
                "completion not confirmed: {}/{} units indexed",
                indexed_units, total_units
            ));
            handled
        }
        ProgressOutcome::Untracked { .. } => {
            let mut handled = Handled::new(MessageOutcome::Ignored, document_id);
            handled.note = Some("document version is not tracked".to_string());
            handled
        }
    }
}
