//! Monotonic millisecond clock used for idle-timeout bookkeeping

use std::time::Instant;

/// A monotonic source of milliseconds
pub trait TickCounter {
    /// Milliseconds elapsed since an arbitrary but fixed point in time
    fn current_ms(&self) -> u64;
}

/// [`TickCounter`] backed by [`std::time::Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemTickCounter {
    start: Instant,
}

impl Default for SystemTickCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTickCounter {
    /// Starts counting from now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl TickCounter for SystemTickCounter {
    fn current_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl<T> TickCounter for std::rc::Rc<T>
where
    T: TickCounter + ?Sized,
{
    fn current_ms(&self) -> u64 {
        (**self).current_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::{SystemTickCounter, TickCounter};

    #[test]
    fn system_tick_counter_is_monotonic() {
        let counter = SystemTickCounter::new();
        let first = counter.current_ms();
        let second = counter.current_ms();
        assert!(second >= first);
    }
}
