use std::time::Instant;

/// Monotonic time source. Every expiry decision reads the same clock.
pub trait Clock: Send + Sync
{
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock
{
    fn now(&self) -> Instant
    {
        Instant::now()
    }
}
