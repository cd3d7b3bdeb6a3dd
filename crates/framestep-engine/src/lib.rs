//! Virtual-clock capture engine: clock override injection, the clock driver,
//! and the capturers that read frames back out of the page.

pub mod capture;
pub mod clock;
pub mod injector;
pub mod mock;

pub use capture::{capturer_for, CanvasCapturer, FrameCapturer, ScreenshotCapturer};
pub use clock::{ClockState, ClockTick, VirtualClock};
pub use injector::{ClockAck, InPageScheduler, OverrideOptions, Scheduler, Step};
pub use mock::MockPage;
