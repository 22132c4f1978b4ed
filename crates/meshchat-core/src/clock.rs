use std::time::Instant;

use chrono::{DateTime, Utc};

/// Source of wall-clock and monotonic time for the router.
///
/// Components below the router take explicit times; only the router asks a
/// clock, so tests can drive it by hand.
pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
    fn instant(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub(crate) mod manual {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    /// Hand-driven clock shared between a test and the router it owns.
    #[derive(Clone)]
    pub struct ManualClock {
        inner: Arc<Mutex<(DateTime<Utc>, Instant)>>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new((Utc::now(), Instant::now()))),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut guard = self.inner.lock().unwrap();
            guard.0 += chrono::Duration::from_std(by).unwrap();
            guard.1 += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.inner.lock().unwrap().0
        }

        fn instant(&self) -> Instant {
            self.inner.lock().unwrap().1
        }
    }
}
