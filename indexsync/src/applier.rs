use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::errors::{Result, SyncError};
use crate::index::{DocType, DocumentIndex};
use crate::models::{
    ChangeSet, DocumentId, FieldValue, OperationFailure, OperationKind, Record, field_value_to_json,
};

/// One single-document mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOperation {
    Create(Record),
    Update {
        id: DocumentId,
        fields: BTreeMap<String, FieldValue>,
    },
    Delete(DocumentId),
}

impl DocumentOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            DocumentOperation::Create(_) => OperationKind::Create,
            DocumentOperation::Update { .. } => OperationKind::Update,
            DocumentOperation::Delete(_) => OperationKind::Delete,
        }
    }
}

/// Expands a change-set into document operations: one create per added record, one update
/// per changed field, one delete per removed id.
pub fn plan_operations(change_set: ChangeSet) -> Vec<DocumentOperation> {
    let mut ops = Vec::with_capacity(
        change_set.added.len() + change_set.changed.len() + change_set.removed.len(),
    );
    ops.extend(change_set.added.into_iter().map(DocumentOperation::Create));
    for changed in change_set.changed {
        for (field, change) in changed.fields {
            ops.push(DocumentOperation::Update {
                id: changed.id,
                fields: BTreeMap::from([(field, change.to)]),
            });
        }
    }
    ops.extend(change_set.removed.into_iter().map(DocumentOperation::Delete));
    ops
}

/// Outcome of applying a batch of operations. Every operation is accounted for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub missing_deletes: Vec<DocumentId>,
    pub failures: Vec<OperationFailure>,
}

impl ApplyReport {
    pub fn attempted(&self) -> usize {
        self.created + self.updated + self.deleted + self.missing_deletes.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: ApplyReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.missing_deletes.extend(other.missing_deletes);
        self.failures.extend(other.failures);
    }

    /// Fails with [`SyncError::PartialApply`] if any operation failed.
    pub fn into_result(self) -> Result<ApplyReport> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::PartialApply {
                attempted: self.attempted(),
                failures: self.failures,
            })
        }
    }
}

enum Outcome {
    Applied(OperationKind),
    MissingDelete(DocumentId),
    Failed(OperationFailure),
}

/// Turns record-level changes into object-document operations on the index.
pub struct DocumentApplier {
    index: Arc<dyn DocumentIndex>,
    id_field: String,
    max_in_flight: usize,
}

impl DocumentApplier {
    pub fn new(index: Arc<dyn DocumentIndex>, id_field: impl Into<String>, max_in_flight: usize) -> Self {
        Self {
            index,
            id_field: id_field.into(),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub async fn create(&self, record: &Record) -> Result<DocumentId> {
        let (id, body) = record.to_document(&self.id_field)?;
        self.index.create(DocType::Object, id, &body).await?;
        Ok(id)
    }

    pub async fn update(&self, id: DocumentId, fields: &BTreeMap<String, FieldValue>) -> Result<()> {
        let doc: JsonMap<String, JsonValue> = fields
            .iter()
            .map(|(k, v)| (k.clone(), field_value_to_json(v)))
            .collect();
        self.index
            .update(DocType::Object, id, &JsonValue::Object(doc))
            .await
    }

    pub async fn delete(&self, id: DocumentId) -> Result<()> {
        self.index.delete(DocType::Object, id).await
    }

    /// Issues every operation with at most `max_in_flight` outstanding at once and waits for
    /// all of them. Nothing is cancelled or rolled back when one fails.
    pub async fn apply(&self, ops: Vec<DocumentOperation>) -> ApplyReport {
        self.apply_all(ops, false).await
    }

    /// Like [`DocumentApplier::apply`], but a create whose document is already stored with
    /// identical contents counts as applied. Replaying a change-set that previously failed
    /// part-way therefore converges instead of tripping over its own earlier creates.
    pub async fn reapply(&self, ops: Vec<DocumentOperation>) -> ApplyReport {
        self.apply_all(ops, true).await
    }

    async fn apply_all(&self, ops: Vec<DocumentOperation>, accept_identical: bool) -> ApplyReport {
        let outcomes: Vec<Outcome> = stream::iter(ops)
            .map(|op| self.execute(op, accept_identical))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut report = ApplyReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Applied(OperationKind::Create) => report.created += 1,
                Outcome::Applied(OperationKind::Update) => report.updated += 1,
                Outcome::Applied(OperationKind::Delete) => report.deleted += 1,
                Outcome::MissingDelete(id) => report.missing_deletes.push(id),
                Outcome::Failed(failure) => report.failures.push(failure),
            }
        }
        report
    }

    async fn execute(&self, op: DocumentOperation, accept_identical: bool) -> Outcome {
        let kind = op.kind();
        let (id, result) = match &op {
            DocumentOperation::Create(record) => {
                let id = record.id(&self.id_field).ok();
                (id, self.create(record).await.map(|_| ()))
            }
            DocumentOperation::Update { id, fields } => (Some(*id), self.update(*id, fields).await),
            DocumentOperation::Delete(id) => (Some(*id), self.delete(*id).await),
        };

        match result {
            Ok(()) => Outcome::Applied(kind),
            Err(SyncError::NotFound(missing)) if kind == OperationKind::Delete => {
                log::warn!("Document {} was already absent; nothing to delete", missing);
                Outcome::MissingDelete(missing)
            }
            Err(SyncError::DuplicateId(existing)) if accept_identical => {
                match self.already_stored(&op).await {
                    Ok(true) => {
                        log::info!("Document {} is already present with the same contents", existing);
                        Outcome::Applied(kind)
                    }
                    Ok(false) => {
                        log::error!("Document {} already exists with different contents", existing);
                        Outcome::Failed(OperationFailure {
                            kind,
                            id,
                            error: SyncError::DuplicateId(existing).to_string(),
                        })
                    }
                    Err(e) => {
                        log::error!("Could not compare stored document {}: {}", existing, e);
                        Outcome::Failed(OperationFailure {
                            kind,
                            id,
                            error: e.to_string(),
                        })
                    }
                }
            }
            Err(e) => {
                log::error!("{:?} of document {:?} failed: {}", kind, id, e);
                Outcome::Failed(OperationFailure {
                    kind,
                    id,
                    error: e.to_string(),
                })
            }
        }
    }

    async fn already_stored(&self, op: &DocumentOperation) -> Result<bool> {
        let DocumentOperation::Create(record) = op else {
            return Ok(false);
        };
        let (id, body) = record.to_document(&self.id_field)?;
        Ok(self.index.get(DocType::Object, id).await?.as_ref() == Some(&body))
    }
}
