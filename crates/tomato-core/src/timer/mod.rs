mod clock;
mod engine;

pub use clock::{Clock, ManualClock, SystemClock, Ticker, TICK_PERIOD};
pub use engine::{format_clock, Phase, TimerEngine};
