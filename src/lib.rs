//! # fake-clock
//!
//! A deterministic, virtual-time clock for exercising time-dependent logic
//! (sleeps, timeouts, periodic tickers) in tests without real wall-clock
//! delays and without flaky timing assertions.
//!
//! Consumers use the same capability set a real clock offers — current
//! time, elapsed-time queries, sleeps, one-shot and repeating timers —
//! while the test driver explicitly moves virtual time forward and
//! deterministically synchronizes with background consumers parked on the
//! clock:
//!
//! ```
//! use chrono::Duration;
//! use fake_clock::FakeClock;
//!
//! let clock = FakeClock::new();
//! let worker = {
//!     let clock = clock.clone();
//!     std::thread::spawn(move || clock.sleep(Duration::seconds(5)))
//! };
//!
//! // Wait for the worker to park, then release it five virtual seconds
//! // later. No real time passes.
//! clock.block_until(1);
//! clock.advance(Duration::seconds(5));
//! worker.join().unwrap();
//! ```

pub mod clock;
pub mod error;
pub mod ticker;
pub mod timer;

mod blocker;



pub use clock::{FakeClock, VirtualTime};
pub use error::ClockError;
pub use ticker::FakeTicker;
pub use timer::FakeTimer;

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
