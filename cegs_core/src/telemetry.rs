//! Rate estimation and the published fused-pressure meter.
//!
//! The scheduler thread is the single writer of [`FusedMeter`]; watchdogs and the
//! process worker read it without locks. Each field is published with release/acquire
//! ordering, so readers see the latest value (not necessarily a consistent tuple).
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cegs_traits::{DeviceError, Meter, MeterReading, RateOfChange, ZeroState};

use crate::error::CoreError;

#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

/// Finite-difference derivative with EMA smoothing, applied twice: once to the value,
/// once to the smoothed rate.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    alpha: f64,
    last: Option<(Instant, f64)>,
    rate: f64,
    rate_rate: f64,
    interval: Duration,
}

impl RateEstimator {
    /// `alpha` in (0, 1]; 1 disables smoothing.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            last: None,
            rate: 0.0,
            rate_rate: 0.0,
            interval: Duration::ZERO,
        }
    }

    pub fn update(&mut self, at: Instant, value: f64) -> RateOfChange {
        if let Some((t0, v0)) = self.last {
            let dt = at.saturating_duration_since(t0);
            if dt.is_zero() {
                return self.current();
            }
            let secs = dt.as_secs_f64();
            let raw = (value - v0) / secs;
            let rate = self.alpha.mul_add(raw - self.rate, self.rate);
            let raw_rr = (rate - self.rate) / secs;
            self.rate_rate = self.alpha.mul_add(raw_rr - self.rate_rate, self.rate_rate);
            self.rate = rate;
            self.interval = dt;
        }
        self.last = Some((at, value));
        self.current()
    }

    pub fn current(&self) -> RateOfChange {
        RateOfChange {
            value: self.rate,
            rate: self.rate_rate,
            interval: self.interval,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.alpha);
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(0.3)
    }
}

/// Lock-free `Meter` view of the fused vacuum-manifold pressure.
#[derive(Debug, Default)]
pub struct FusedMeter {
    value: AtomicF64,
    sensitivity: AtomicF64,
    rate: AtomicF64,
    rate_rate: AtomicF64,
    interval_us: AtomicU64,
}

impl FusedMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new reading. Only the telemetry refresh calls this.
    pub fn publish(&self, value: f64, sensitivity: f64, rate: RateOfChange) {
        self.rate_rate.store(rate.rate);
        self.rate.store(rate.value);
        self.sensitivity.store(sensitivity);
        self.interval_us.store(
            u64::try_from(rate.interval.as_micros()).unwrap_or(u64::MAX),
            Ordering::Release,
        );
        self.value.store(value);
    }

    pub fn value(&self) -> f64 {
        self.value.load()
    }
}

impl Meter for FusedMeter {
    fn reading(&self) -> Result<MeterReading, DeviceError> {
        Ok(MeterReading {
            value: self.value.load(),
            sensitivity: self.sensitivity.load(),
            rate: RateOfChange {
                value: self.rate.load(),
                rate: self.rate_rate.load(),
                interval: Duration::from_micros(self.interval_us.load(Ordering::Acquire)),
            },
            zero: ZeroState::Idle,
        })
    }

    fn zero(&self) -> Result<(), DeviceError> {
        Err(Box::new(CoreError::State(
            "the fused pressure is derived; zero the underlying gauge".into(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_slope_converges_and_second_derivative_decays() {
        let mut est = RateEstimator::new(0.5);
        let t0 = Instant::now();
        let mut r = RateOfChange::default();
        for i in 0..60u32 {
            let t = t0 + Duration::from_millis(100) * i;
            r = est.update(t, 2.0 * f64::from(i) * 0.1);
        }
        assert!((r.value - 2.0).abs() < 1e-6, "rate={}", r.value);
        assert!(r.rate.abs() < 1e-3);
        assert_eq!(r.interval, Duration::from_millis(100));
    }

    #[test]
    fn duplicate_timestamps_are_ignored() {
        let mut est = RateEstimator::new(1.0);
        let t0 = Instant::now();
        est.update(t0, 1.0);
        let r1 = est.update(t0 + Duration::from_secs(1), 3.0);
        let r2 = est.update(t0 + Duration::from_secs(1), 100.0);
        assert_eq!(r1, r2);
        assert!((r1.value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn fused_meter_round_trips_and_refuses_zero() {
        let m = FusedMeter::new();
        m.publish(
            1e-3,
            1e-6,
            RateOfChange {
                value: -1e-4,
                rate: 0.0,
                interval: Duration::from_millis(50),
            },
        );
        let r = m.reading().unwrap();
        assert!((r.value - 1e-3).abs() < f64::EPSILON);
        assert_eq!(r.rate.interval, Duration::from_millis(50));
        assert!(m.zero().is_err());
    }
}
