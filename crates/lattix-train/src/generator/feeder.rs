//! Raw batch producer.

use crate::batch::RawBatch;
use crate::error::{Error, Result};
use crate::triple::Triple;
use crossbeam_channel::{SendTimeoutError, Sender};
use rand::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a blocked send waits before rechecking the stop flag.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cyclic slicer over one fixed permutation of the training triples.
///
/// Batch `i` covers permutation positions `[batch_size * i, batch_size * (i + 1))`.
/// After the last full slice the index wraps to 0 and the same permutation is
/// reused. The remainder `N % batch_size` is never emitted.
#[derive(Debug, Clone)]
pub struct BatchFeeder {
    triples: Vec<Triple>,
    permutation: Vec<usize>,
    batch_size: usize,
    number_of_batches: usize,
    next_index: usize,
}

impl BatchFeeder {
    pub fn new<R: Rng + ?Sized>(triples: Vec<Triple>, batch_size: usize, rng: &mut R) -> Result<Self> {
        let number_of_batches = if batch_size == 0 { 0 } else { triples.len() / batch_size };
        if number_of_batches == 0 {
            return Err(Error::InsufficientTriples {
                triples: triples.len(),
                batch_size,
            });
        }

        let mut permutation: Vec<usize> = (0..triples.len()).collect();
        permutation.shuffle(rng);

        Ok(Self {
            triples,
            permutation,
            batch_size,
            number_of_batches,
            next_index: 0,
        })
    }

    /// `floor(N / batch_size)`.
    pub fn number_of_batches(&self) -> usize {
        self.number_of_batches
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Emit the next slice and advance, wrapping after the last one.
    pub fn next_batch(&mut self) -> RawBatch {
        let index = self.next_index;
        let start = self.batch_size * index;
        let triples = self.permutation[start..start + self.batch_size]
            .iter()
            .map(|&i| self.triples[i])
            .collect();

        self.next_index += 1;
        if self.next_index == self.number_of_batches {
            self.next_index = 0;
        }

        RawBatch { index, triples }
    }
}

impl Iterator for BatchFeeder {
    type Item = RawBatch;

    fn next(&mut self) -> Option<RawBatch> {
        Some(self.next_batch())
    }
}

/// Feeder thread body: push slices until stopped or every worker is gone.
pub(crate) fn run_feeder(mut feeder: BatchFeeder, raw_tx: Sender<RawBatch>, stop: Arc<AtomicBool>) {
    let mut passes = 0usize;
    'produce: while !stop.load(Ordering::Acquire) {
        let mut batch = feeder.next_batch();
        let wrapped = batch.index + 1 == feeder.number_of_batches();

        loop {
            match raw_tx.send_timeout(batch, POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if stop.load(Ordering::Acquire) {
                        break 'produce;
                    }
                    batch = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => break 'produce,
            }
        }

        if wrapped {
            passes += 1;
            tracing::debug!(passes, "feeder completed a pass over the permutation");
        }
    }
    tracing::debug!(passes, "feeder exiting");
}
