//! Projection runner utilities (read model builders).
//!
//! Deterministic replay and cursor tracking without storage assumptions.

use crate::{EventEnvelope, Projection};

/// Tracks projection progress through the global stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionCursor {
    last_sequence_number: u64,
}

impl ProjectionCursor {
    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// An envelope skipped ahead of the cursor (a gap in delivery).
    #[error("projection gap: last applied sequence {last}, found {found}")]
    Gap { last: u64, found: u64 },
}

/// Runs envelopes through a projection and tracks progress.
///
/// Duplicates (sequence at or below the cursor) are ignored; a gap is an error
/// because the read model would silently miss changes.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Current cursor (if any envelopes were applied).
    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Apply a single envelope, enforcing contiguous sequencing.
    ///
    /// Returns `Ok(false)` when the envelope was a duplicate.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<bool, ProjectionError> {
        let found = envelope.sequence_number();
        let last = self.cursor.map(|c| c.last_sequence_number).unwrap_or(0);

        if found <= last {
            return Ok(false);
        }
        if found != last + 1 {
            return Err(ProjectionError::Gap { last, found });
        }

        self.projection.apply(envelope);
        self.cursor = Some(ProjectionCursor {
            last_sequence_number: found,
        });
        Ok(true)
    }

    /// Apply many envelopes in order.
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(), ProjectionError>
    where
        P::Ev: 'a,
    {
        for env in envelopes {
            self.apply(env)?;
        }
        Ok(())
    }

    /// Rebuild a projection from scratch by replaying the full history.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(P, Option<ProjectionCursor>), ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(envelopes)?;
        Ok((runner.projection, runner.cursor))
    }
}
