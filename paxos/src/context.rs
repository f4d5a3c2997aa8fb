//! # Summary
//!
//! This module holds the per-node protocol state: the node's current
//! proposal id, the application's workload processor, and the durable log
//! of accepted values. One context is created at node start and mutated
//! by both follower handlers and leader continuations.

use std::cmp;

use crate::durable;

/// Application seam: a deterministic function from request bytes to reply
/// bytes.
///
/// Two honest followers presented the same workload must return
/// byte-identical replies; otherwise the quorum reports an inconsistent
/// response to the client.
pub trait Processor: Send + Sync {
    fn process(&self, workload: &[u8]) -> Vec<u8>;
}

impl<F> Processor for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync,
{
    fn process(&self, workload: &[u8]) -> Vec<u8> {
        self(workload)
    }
}

impl Processor for Box<dyn Processor> {
    fn process(&self, workload: &[u8]) -> Vec<u8> {
        (**self).process(workload)
    }
}

/// Per-node mutable protocol state.
pub struct Context {
    proposal_id: i64,
    processor: Box<dyn Processor>,
    log: durable::Log,
}

impl Context {
    pub fn new(processor: Box<dyn Processor>, log: durable::Log) -> Self {
        Context {
            proposal_id: 0,
            processor,
            log,
        }
    }

    /// The highest proposal id this node has used or observed.
    pub fn proposal_id(&self) -> i64 {
        self.proposal_id
    }

    /// Claims the next proposal id for a new round.
    pub fn next_proposal_id(&mut self) -> i64 {
        self.proposal_id += 1;
        self.proposal_id
    }

    /// Advances the proposal id to `proposal_id` if it is larger. The id
    /// never moves backwards.
    pub fn observe(&mut self, proposal_id: i64) {
        self.proposal_id = cmp::max(self.proposal_id, proposal_id);
    }

    /// Runs the application processor over one workload.
    pub fn process(&self, workload: &[u8]) -> Vec<u8> {
        self.processor.process(workload)
    }

    pub fn log(&self) -> &durable::Log {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut durable::Log {
        &mut self.log
    }
}

#[cfg(test)]
mod tests {
    use crate::durable::{Log, Memory};

    use super::*;

    fn context() -> Context {
        let log = Log::new(Box::new(Memory::default()));
        Context::new(Box::new(|workload: &[u8]| workload.to_vec()), log)
    }

    #[test]
    fn proposal_ids_are_monotonic() {
        let mut context = context();
        assert_eq!(context.proposal_id(), 0);
        assert_eq!(context.next_proposal_id(), 1);
        assert_eq!(context.next_proposal_id(), 2);

        context.observe(7);
        assert_eq!(context.proposal_id(), 7);

        // Observing a smaller id never regresses.
        context.observe(3);
        assert_eq!(context.proposal_id(), 7);

        assert_eq!(context.next_proposal_id(), 8);
    }

    #[test]
    fn processor_output_is_returned_verbatim() {
        let context = context();
        assert_eq!(context.process(b"payload"), b"payload");
    }
}
