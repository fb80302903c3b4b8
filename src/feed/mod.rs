//! Bounded display projection of the measurement history.

mod types;

pub use types::{ChartPoint, FeedSnapshot, PhaseValues};

use crate::history::MeasurementAggregator;

pub const DEFAULT_MAX_POINTS: usize = 30;

/// Recomputes its buffer from the aggregator's full history on every
/// refresh; it never writes to the history.
#[derive(Debug)]
pub struct WindowedFeed {
    capacity: usize,
    paused: bool,
    /// History index below which entries were cleared from view.
    floor: usize,
    seen_generation: u64,
    points: Vec<ChartPoint>,
    hidden: usize,
}

impl Default for WindowedFeed {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS)
    }
}

impl WindowedFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            paused: false,
            floor: 0,
            seen_generation: 0,
            points: Vec::with_capacity(capacity.max(1)),
            hidden: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn points(&self) -> &[ChartPoint] {
        &self.points
    }

    /// Picks up new history. Returns whether the displayed buffer changed.
    pub fn refresh(&mut self, aggregator: &MeasurementAggregator) -> bool {
        if self.paused {
            return false;
        }
        self.recompute(aggregator)
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Unfreezes and shows the history as it is now.
    pub fn resume(&mut self, aggregator: &MeasurementAggregator) -> bool {
        self.paused = false;
        self.recompute(aggregator)
    }

    /// Empties the display. Only measurements that arrive afterwards show up
    /// again; the history itself is untouched.
    pub fn clear(&mut self, aggregator: &MeasurementAggregator) {
        self.seen_generation = aggregator.generation();
        self.floor = aggregator.len();
        self.hidden = aggregator.len();
        self.points.clear();
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            points: self.points.clone(),
            paused: self.paused,
            capacity: self.capacity,
            hidden: self.hidden,
        }
    }

    fn recompute(&mut self, aggregator: &MeasurementAggregator) -> bool {
        if aggregator.generation() != self.seen_generation {
            self.seen_generation = aggregator.generation();
            self.floor = 0;
        }

        let history = aggregator.history();
        let visible = &history[self.floor.min(history.len())..];
        let window = &visible[visible.len().saturating_sub(self.capacity)..];

        let mut points: Vec<ChartPoint> = window.iter().map(ChartPoint::from).collect();
        // Arrival order is not time order; stable sort keeps ties in arrival order.
        points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        self.hidden = history.len() - window.len();
        if points == self.points {
            return false;
        }
        self.points = points;
        true
    }
}
