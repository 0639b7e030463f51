//! Per-resource-kind handlers bound to the watch layer's add/update/delete callbacks.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug_span, trace, Span};

use crate::emit::{EmitError, EventEmitter};
use crate::filter::{notable_update, FilterSpec};
use crate::{Event, EventKind, ObjectTree, ResourceIdentity};

/// One watched resource kind: identity, effective filter and output.
#[derive(Debug, Clone)]
pub struct WatchUnit {
    identity: ResourceIdentity,
    filter: FilterSpec,
    emitter: Arc<EventEmitter>,
    span: Span,
}

impl WatchUnit {
    pub fn new(identity: ResourceIdentity, filter: FilterSpec, emitter: Arc<EventEmitter>) -> Self {
        let span = debug_span!(
            "watch_unit",
            group = %identity.group,
            version = %identity.version,
            kind = %identity.resource,
        );
        Self { identity, filter, emitter, span }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    /// Logging context carrying this unit's group/version/kind.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn on_add(&self, obj: &ObjectTree) -> Result<(), EmitError> {
        if !self.filter.in_scope(obj) {
            return Ok(());
        }
        self.emit(EventKind::Add, self.filter.project(obj))
    }

    /// Scope is judged on the new state only; leaving scope emits nothing.
    pub fn on_update(&self, old: &ObjectTree, new: &ObjectTree) -> Result<(), EmitError> {
        if !self.filter.in_scope(new) {
            return Ok(());
        }
        match notable_update(old, new, &self.filter) {
            Some(projected) => self.emit(EventKind::Update, projected),
            None => {
                counter!("kwatch_updates_suppressed_total", 1u64);
                trace!(parent: &self.span, name = object_name(new), "update suppressed");
                Ok(())
            }
        }
    }

    pub fn on_delete(&self, obj: &ObjectTree) -> Result<(), EmitError> {
        if !self.filter.in_scope(obj) {
            return Ok(());
        }
        self.emit(EventKind::Delete, self.filter.project(obj))
    }

    fn emit(&self, kind: EventKind, obj: ObjectTree) -> Result<(), EmitError> {
        self.emitter.emit(&Event { kind, identity: &self.identity, obj })?;
        counter!("kwatch_events_emitted_total", 1u64, "event_type" => kind.as_str());
        Ok(())
    }
}

fn object_name(obj: &ObjectTree) -> &str {
    obj.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("")
}
