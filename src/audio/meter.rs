use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Latest capture RMS, shared lock-free between the capture pump and readers.
/// Writes never wait; readers may see a slightly stale value.
#[derive(Debug, Clone, Default)]
pub struct VolumeMeter {
    bits: Arc<AtomicU32>,
}

impl VolumeMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_level() {
        let meter = VolumeMeter::new();
        let reader = meter.clone();
        meter.set(0.25);
        assert!((reader.get() - 0.25).abs() < f32::EPSILON);
        meter.reset();
        assert!(reader.get().abs() < f32::EPSILON);
    }
}
