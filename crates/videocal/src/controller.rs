//! Interactive and batch session control.

use crate::driver::{DriverError, FrameOutcome, FrameProcessor, Trigger, VideoDriver};
use log::{info, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use videocal_core::Frame;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControllerState {
    #[default]
    Idle,
    WaitingForTrigger,
    Sampling,
    Terminated,
}

/// Single-slot mailbox for operator triggers.
///
/// Posting replaces a trigger that has not been taken yet. The controller
/// drains it once per tick.
#[derive(Debug, Default)]
pub struct TriggerInbox {
    slot: Mutex<Option<Trigger>>,
}

impl TriggerInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, trigger: Trigger) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(trigger);
    }

    pub fn take(&self) -> Option<Trigger> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Put back a trigger that could not be served. A trigger posted in the
    /// meantime wins.
    pub fn restore(&self, trigger: Trigger) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(trigger);
        }
    }
}

/// Where interactive sessions show frames.
pub trait FrameSink {
    fn show(&mut self, frame: &Frame);
}

/// Discards every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn show(&mut self, _frame: &Frame) {}
}

/// Counters from one batch run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub frames_grabbed: usize,
    pub frames_processed: usize,
    pub frames_with_points: usize,
}

/// Processes every `sample frequency`-th frame until the source runs dry.
#[derive(Debug)]
pub struct BatchController<P> {
    driver: VideoDriver<P>,
    state: ControllerState,
}

impl<P: FrameProcessor> BatchController<P> {
    pub fn new(driver: VideoDriver<P>) -> Self {
        Self {
            driver,
            state: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn driver(&self) -> &VideoDriver<P> {
        &self.driver
    }

    pub fn into_driver(self) -> VideoDriver<P> {
        self.driver
    }

    /// Frames are counted from one; frame `n` is processed when
    /// `n % sample_frequency == 0`. The first failed grab ends the run.
    pub fn run(&mut self) -> Result<BatchSummary, DriverError> {
        let frequency = self.driver.config().sample_frequency.max(1);
        let mut summary = BatchSummary::default();
        self.state = ControllerState::Sampling;

        while self.driver.grab_frame().is_some() {
            summary.frames_grabbed += 1;
            if summary.frames_grabbed % frequency != 0 {
                continue;
            }
            let outcome = match self.driver.process_frame(None) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.driver.shutdown();
                    self.state = ControllerState::Terminated;
                    return Err(err);
                }
            };
            summary.frames_processed += 1;
            if outcome.num_points > 0 {
                summary.frames_with_points += 1;
            }
        }

        self.driver.shutdown();
        self.state = ControllerState::Terminated;
        info!(
            "processed {} of {} frames, points found in {}",
            summary.frames_processed, summary.frames_grabbed, summary.frames_with_points
        );
        Ok(summary)
    }
}

/// Trigger-driven session: one grab per tick, processing only on request.
#[derive(Debug)]
pub struct InteractiveController<P, S> {
    driver: VideoDriver<P>,
    sink: S,
    state: ControllerState,
    keypress_delay: Duration,
    annotation_until: Option<Instant>,
    last_outcome: Option<FrameOutcome>,
}

impl<P: FrameProcessor, S: FrameSink> InteractiveController<P, S> {
    pub fn new(driver: VideoDriver<P>, sink: S) -> Self {
        let keypress_delay = driver.config().keypress_delay;
        Self {
            driver,
            sink,
            state: ControllerState::Idle,
            keypress_delay,
            annotation_until: None,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn driver(&self) -> &VideoDriver<P> {
        &self.driver
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Outcome of the most recent triggered capture.
    pub fn last_outcome(&self) -> Option<&FrameOutcome> {
        self.last_outcome.as_ref()
    }

    fn terminate(&mut self) -> ControllerState {
        self.driver.shutdown();
        self.annotation_until = None;
        self.state = ControllerState::Terminated;
        self.state
    }

    /// Advance the session by one frame.
    ///
    /// A trigger stays pending until a frame has been grabbed for it.
    pub fn tick(
        &mut self,
        now: Instant,
        inbox: &TriggerInbox,
    ) -> Result<ControllerState, DriverError> {
        if self.state == ControllerState::Terminated {
            return Ok(self.state);
        }
        self.state = ControllerState::WaitingForTrigger;

        let trigger = inbox.take();
        if trigger == Some(Trigger::Quit) {
            info!("detected 'q' key press, exiting");
            return Ok(self.terminate());
        }

        if self.driver.grab_frame().is_none() {
            if self.driver.source_exhausted() {
                return Ok(self.terminate());
            }
            warn!("failed to read frame");
            if let Some(trigger) = trigger {
                inbox.restore(trigger);
            }
            return Ok(self.state);
        }

        if self.annotation_until.is_some_and(|until| now >= until) {
            self.annotation_until = None;
        }
        if self.annotation_until.is_none() {
            if let Some(frame) = self.driver.current_frame() {
                self.sink.show(frame);
            }
        }

        if let Some(trigger) = trigger {
            info!("detected '{}' key press", trigger.key());
            let outcome = self.driver.process_frame(Some(trigger))?;
            match &outcome.annotated {
                Some(annotated) if outcome.num_points > 0 => {
                    self.sink.show(annotated);
                    self.annotation_until = Some(now + self.keypress_delay);
                }
                _ => info!("failed to detect points"),
            }
            self.last_outcome = Some(outcome);
        }

        Ok(self.state)
    }

    /// Tick every `period` until the session terminates.
    pub fn run(&mut self, inbox: &TriggerInbox, period: Duration) -> Result<(), DriverError> {
        loop {
            let started = Instant::now();
            if self.tick(started, inbox)? == ControllerState::Terminated {
                return Ok(());
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }
}
