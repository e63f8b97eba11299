//! Synthetic event streams.
//!
//! Seeded generators for sorted, in-range events. Used by tests, benchmarks
//! and the `generate` command of the CLI.

use crate::types::Event;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates `n_events` random events sorted by timestamp.
///
/// Coordinates are drawn from `[0, width)` x `[0, height)` and timestamps
/// from `[start_ts, end_ts)`. The same seed always yields the same events.
pub fn random_events(
    n_events: usize,
    width: u16,
    height: u16,
    start_ts: u64,
    end_ts: u64,
    seed: u64,
) -> Vec<Event> {
    let mut rng = StdRng::seed_from_u64(seed);
    fill_random(&mut rng, n_events, width, height, start_ts, end_ts)
}

fn fill_random(
    rng: &mut StdRng,
    n_events: usize,
    width: u16,
    height: u16,
    start_ts: u64,
    end_ts: u64,
) -> Vec<Event> {
    let width = width.max(1);
    let height = height.max(1);
    let end_ts = end_ts.max(start_ts + 1);

    let mut events: Vec<Event> = (0..n_events)
        .map(|_| {
            Event::new(
                rng.gen_range(start_ts..end_ts),
                rng.gen_range(0..width),
                rng.gen_range(0..height),
                rng.gen_range(0..=1),
            )
        })
        .collect();
    events.sort_by_key(|e| e.t);
    events
}

/// Iterator over consecutive chunks of a random event stream.
///
/// The time range is split evenly between chunks, so concatenating every
/// chunk gives one sorted stream of `n_events` events.
#[derive(Debug)]
pub struct RandomEventChunks {
    rng: StdRng,
    remaining: usize,
    chunk_size: usize,
    width: u16,
    height: u16,
    chunk_start: u64,
    chunk_span: u64,
    end_ts: u64,
}

impl RandomEventChunks {
    pub fn new(
        n_events: usize,
        width: u16,
        height: u16,
        start_ts: u64,
        end_ts: u64,
        chunk_size: usize,
        seed: u64,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        let n_chunks = n_events.div_ceil(chunk_size).max(1) as u64;
        let chunk_span = (end_ts.saturating_sub(start_ts) / n_chunks).max(1);
        Self {
            rng: StdRng::seed_from_u64(seed),
            remaining: n_events,
            chunk_size,
            width,
            height,
            chunk_start: start_ts,
            chunk_span,
            end_ts,
        }
    }
}

impl Iterator for RandomEventChunks {
    type Item = Vec<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let count = self.remaining.min(self.chunk_size);
        self.remaining -= count;

        // the last chunk runs to the end of the range
        let chunk_end = if self.remaining == 0 {
            self.end_ts.max(self.chunk_start + 1)
        } else {
            self.chunk_start + self.chunk_span
        };
        let events = fill_random(
            &mut self.rng,
            count,
            self.width,
            self.height,
            self.chunk_start,
            chunk_end,
        );
        self.chunk_start = chunk_end;
        Some(events)
    }
}
