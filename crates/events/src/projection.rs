use crate::{Event, EventEnvelope};

/// A projection builds a read model from the committed change stream.
///
/// Read models are disposable: they can be dropped and rebuilt by replaying
/// the journal. Reporting queries read them and must tolerate lag behind the
/// ledger.
///
/// `apply` must be idempotent for at-least-once delivery; `ProjectionRunner`
/// enforces this by skipping envelopes at or below its cursor. Events a
/// projection does not care about are ignored.
pub trait Projection {
    type Ev: Event;

    /// Apply a single envelope to the read model.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
