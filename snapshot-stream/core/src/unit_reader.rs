use crate::error::PipelineError;
use crate::work_queue::WorkUnit;
use std::collections::HashMap;

/// Counts computed by one mapper from one work unit
pub type PartialAggregate = HashMap<String, i64>;

/// Turns a work unit into partial counts
///
/// Keys must not contain `,`, which is the field separator on the wire.
/// Reading is blocking; mappers call it off the async executor.
pub trait UnitReader: Send + Sync + 'static {
    fn read(&self, unit: &WorkUnit) -> Result<PartialAggregate, PipelineError>;
}

impl<F> UnitReader for F
where
    F: Fn(&WorkUnit) -> Result<PartialAggregate, PipelineError> + Send + Sync + 'static,
{
    fn read(&self, unit: &WorkUnit) -> Result<PartialAggregate, PipelineError> {
        (self)(unit)
    }
}
