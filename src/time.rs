//! Millisecond clock used for keepalive and response timeouts.

/// A monotonic millisecond counter.
///
/// The value wraps at `u32::MAX`; all elapsed-time arithmetic in this crate
/// uses wrapping subtraction, so wrap-around is harmless as long as no single
/// interval exceeds ~49 days.
pub trait Clock {
    /// Current time in milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u32;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Milliseconds elapsed since `start`.
pub(crate) fn elapsed_ms(clock: &impl Clock, start: u32) -> u32 {
    clock.now_ms().wrapping_sub(start)
}

/// Wall clock backed by [`std::time::Instant`].
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Starts a clock at zero.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}
