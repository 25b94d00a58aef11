//! Splits - Half-lap timing line and gaps to the half-lap leader

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tracks crossings of the line opposite start/finish
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitTracker {
    /// Car id that opened the current epoch
    pub leader: Option<u32>,
    /// Incremented each time the leader crosses
    pub epoch: u32,
    pub leader_time_ms: f64,
    /// Gap to the leader per car id for the current epoch
    pub gaps: BTreeMap<u32, f64>,
}

impl SplitTracker {
    /// Forget all split history (used when cars are gridded)
    pub fn reset(&mut self) {
        self.leader = None;
        self.epoch = 0;
        self.leader_time_ms = 0.0;
        self.gaps.clear();
    }

    /// Register a crossing; returns the recorded gap for non-leaders
    pub fn record_crossing(&mut self, car_id: u32, time_ms: f64) -> Option<f64> {
        match self.leader {
            Some(leader) if leader != car_id => {
                let gap = (time_ms - self.leader_time_ms).max(0.0);
                self.gaps.insert(car_id, gap);
                Some(gap)
            }
            _ => {
                self.leader = Some(car_id);
                self.epoch += 1;
                self.leader_time_ms = time_ms;
                self.gaps.clear();
                self.gaps.insert(car_id, 0.0);
                None
            }
        }
    }

    /// Gap to the half-lap leader in the current epoch
    pub fn gap_for(&self, car_id: u32) -> Option<f64> {
        self.gaps.get(&car_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_crosser_leads_and_others_get_gaps() {
        let mut splits = SplitTracker::default();
        assert_eq!(splits.record_crossing(3, 1000.0), None);
        assert_eq!(splits.leader, Some(3));
        assert_eq!(splits.epoch, 1);
        assert_eq!(splits.record_crossing(1, 1250.0), Some(250.0));
        assert_eq!(splits.record_crossing(2, 1900.0), Some(900.0));
        assert_eq!(splits.gap_for(1), Some(250.0));
        assert_eq!(splits.gap_for(3), Some(0.0));
    }

    #[test]
    fn leader_recrossing_opens_new_epoch() {
        let mut splits = SplitTracker::default();
        splits.record_crossing(3, 1000.0);
        splits.record_crossing(1, 1250.0);
        splits.record_crossing(3, 20_000.0);
        assert_eq!(splits.epoch, 2);
        assert_eq!(splits.gap_for(1), None);
        assert_eq!(splits.record_crossing(1, 20_400.0), Some(400.0));
    }

    #[test]
    fn reset_clears_leadership() {
        let mut splits = SplitTracker::default();
        splits.record_crossing(3, 1000.0);
        splits.reset();
        assert_eq!(splits.leader, None);
        assert_eq!(splits.epoch, 0);
        assert_eq!(splits.record_crossing(1, 50.0), None);
        assert_eq!(splits.leader, Some(1));
    }
}
