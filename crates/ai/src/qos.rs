//! Latency/jitter degradation bands used to decide, per utterance,
//! whether translated audio synthesis is still worth attempting or
//! whether listeners should fall back to subtitle-only delivery.

use std::collections::VecDeque;
use std::time::Instant;

const HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationLevel {
    None,
    Light,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy)]
pub struct QosMetrics {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub degradation: DegradationLevel,
    /// True when the pipeline should skip audio synthesis for this
    /// utterance and deliver text-only subtitles instead.
    pub should_fallback_to_subtitle: bool,
}

/// A started-but-not-yet-ended measurement. Holding this prevents
/// accidentally calling `end_measurement` twice for one utterance.
pub struct Measurement {
    started_at: Instant,
}

pub struct QosMonitor {
    max_latency_ms: u64,
    max_jitter_ms: u64,
    last_latency_ms: Option<f64>,
    history: VecDeque<f64>,
}

impl QosMonitor {
    pub fn new(max_latency_ms: u64, max_jitter_ms: u64) -> Self {
        Self {
            max_latency_ms,
            max_jitter_ms,
            last_latency_ms: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn start_measurement(&self) -> Measurement {
        Measurement {
            started_at: Instant::now(),
        }
    }

    pub fn end_measurement(&mut self, measurement: Measurement) -> QosMetrics {
        let latency_ms = measurement.started_at.elapsed().as_secs_f64() * 1000.0;
        let jitter_ms = match self.last_latency_ms {
            Some(prev) => (latency_ms - prev).abs(),
            None => 0.0,
        };
        self.last_latency_ms = Some(latency_ms);

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(latency_ms);

        let max_latency = self.max_latency_ms as f64;
        let max_jitter = self.max_jitter_ms as f64;

        let degradation = if latency_ms <= max_latency {
            DegradationLevel::None
        } else if latency_ms <= max_latency * 1.5 {
            DegradationLevel::Light
        } else if latency_ms <= max_latency * 2.0 {
            DegradationLevel::Moderate
        } else {
            DegradationLevel::Severe
        };

        let should_fallback_to_subtitle = latency_ms > max_latency * 1.5 || jitter_ms > max_jitter * 2.0;

        QosMetrics {
            latency_ms,
            jitter_ms,
            degradation,
            should_fallback_to_subtitle,
        }
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        if self.history.is_empty() {
            None
        } else {
            Some(self.history.iter().sum::<f64>() / self.history.len() as f64)
        }
    }

    /// True when every sample in the rolling history stays within the
    /// configured bound — used by callers that want to know whether
    /// conditions have settled down after a burst of degradation.
    pub fn is_stable(&self) -> bool {
        let max_latency = self.max_latency_ms as f64;
        !self.history.is_empty() && self.history.iter().all(|&l| l <= max_latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn within_bound_is_no_degradation() {
        let mut qos = QosMonitor::new(1200, 200);
        let m = qos.start_measurement();
        let metrics = qos.end_measurement(m);
        assert_eq!(metrics.degradation, DegradationLevel::None);
        assert!(!metrics.should_fallback_to_subtitle);
    }

    #[test]
    fn severe_latency_triggers_fallback() {
        let mut qos = QosMonitor::new(1, 200);
        let m = qos.start_measurement();
        sleep(Duration::from_millis(5));
        let metrics = qos.end_measurement(m);
        assert_eq!(metrics.degradation, DegradationLevel::Severe);
        assert!(metrics.should_fallback_to_subtitle);
    }

    #[test]
    fn moderate_latency_also_triggers_fallback() {
        // max_latency_ms = 20: the (30ms, 40ms] window is Moderate; a
        // ~32ms measured call must still fall back to subtitle-only.
        let mut qos = QosMonitor::new(20, 2000);
        let m = qos.start_measurement();
        sleep(Duration::from_millis(32));
        let metrics = qos.end_measurement(m);
        assert_eq!(metrics.degradation, DegradationLevel::Moderate);
        assert!(metrics.should_fallback_to_subtitle);
    }

    #[test]
    fn jitter_computed_against_previous_sample() {
        let mut qos = QosMonitor::new(1200, 200);
        let m1 = qos.start_measurement();
        let metrics1 = qos.end_measurement(m1);
        assert_eq!(metrics1.jitter_ms, 0.0);

        let m2 = qos.start_measurement();
        let metrics2 = qos.end_measurement(m2);
        assert!(metrics2.jitter_ms >= 0.0);
    }
}
