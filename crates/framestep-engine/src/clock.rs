//! Virtual clock driver: owns the session's virtual time and moves the page
//! along it, one monotonic step at a time.

use framestep_types::{
    config::{ClockConfig, NavigationPolicy},
    FramestepError, Result,
};
use tracing::{debug, warn};

use crate::injector::{AdvanceRequest, OverrideOptions, Scheduler, Step};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockState {
    Uninitialized,
    Installed,
    Advancing(f64),
    Idle(f64),
    Closed,
}

/// Outcome of one advance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockTick {
    /// Session instant the clock now rests at.
    pub instant_ms: f64,
    /// Virtual time reported by the page itself.
    pub page_ms: f64,
    /// Set when the page navigated since the previous advance and the clock
    /// recovered according to this policy.
    pub navigation: Option<NavigationPolicy>,
}

pub struct VirtualClock<S: Scheduler> {
    scheduler: S,
    state: ClockState,
    policy: NavigationPolicy,
    epoch_ms: Option<f64>,
    token: Option<String>,
    page_offset_ms: f64,
    navigations: u32,
}

impl<S: Scheduler> VirtualClock<S> {
    pub fn new(scheduler: S, config: &ClockConfig) -> Self {
        Self {
            scheduler,
            state: ClockState::Uninitialized,
            policy: config.on_navigation,
            epoch_ms: config.epoch_ms,
            token: None,
            page_offset_ms: 0.0,
            navigations: 0,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Mid-session navigations the clock has recovered from.
    pub fn navigations(&self) -> u32 {
        self.navigations
    }

    /// Last instant the clock was advanced to, if any.
    pub fn current_ms(&self) -> Option<f64> {
        match self.state {
            ClockState::Idle(t) => Some(t),
            _ => None,
        }
    }

    /// Register the override so it runs before page scripts on every
    /// navigation. Must precede the first navigation; repeated calls are no-ops.
    pub async fn install(&mut self, initial_ms: f64) -> Result<()> {
        match self.state {
            ClockState::Uninitialized => {
                let options = OverrideOptions {
                    initial_time: initial_ms,
                    epoch: self.epoch_ms,
                };
                self.scheduler.install(&options).await?;
                self.state = ClockState::Installed;
                debug!("Clock override registered at {}ms", initial_ms);
                Ok(())
            }
            ClockState::Closed => Err(closed_error()),
            _ => {
                debug!("Clock override already registered");
                Ok(())
            }
        }
    }

    /// Confirm the override is live in the loaded document and remember its
    /// installation token.
    pub async fn attach(&mut self) -> Result<()> {
        match self.state {
            ClockState::Uninitialized => {
                return Err(FramestepError::ClockState(
                    "attach called before the override was installed".into(),
                ))
            }
            ClockState::Closed => return Err(closed_error()),
            _ => {}
        }
        let ack = self.scheduler.handshake().await?.ok_or_else(|| {
            FramestepError::OverrideLost(
                "virtual clock runtime not found in the loaded page; page scripts would run on real time"
                    .into(),
            )
        })?;
        debug!("Clock attached at page time {}ms", ack.now);
        self.token = Some(ack.token);
        Ok(())
    }

    /// Advance to `target_ms` running due timers only.
    pub async fn go_to_time(&mut self, target_ms: f64) -> Result<ClockTick> {
        self.advance(target_ms, Step::TimersOnly, false).await
    }

    /// Advance to `target_ms` and pump one animation-frame cycle there.
    pub async fn go_to_time_and_animate(&mut self, target_ms: f64) -> Result<ClockTick> {
        self.advance(target_ms, Step::AnimationFrame, false).await
    }

    /// Like [`go_to_time_and_animate`](Self::go_to_time_and_animate), but only
    /// returns once the browser has painted the result.
    pub async fn go_to_time_and_paint(&mut self, target_ms: f64) -> Result<ClockTick> {
        self.advance(target_ms, Step::AnimationFrame, true).await
    }

    pub async fn advance(
        &mut self,
        target_ms: f64,
        step: Step,
        await_paint: bool,
    ) -> Result<ClockTick> {
        let floor = match self.state {
            ClockState::Uninitialized => {
                return Err(FramestepError::ClockState(
                    "clock advanced before the override was installed".into(),
                ))
            }
            ClockState::Closed => return Err(closed_error()),
            ClockState::Advancing(t) => {
                return Err(FramestepError::ClockState(format!(
                    "advance to {t}ms is still in flight"
                )))
            }
            ClockState::Installed => None,
            ClockState::Idle(t) => Some(t),
        };
        if !target_ms.is_finite() {
            return Err(FramestepError::ClockState(format!(
                "cannot advance to non-finite instant {target_ms}"
            )));
        }
        if let Some(current_ms) = floor {
            if target_ms < current_ms {
                return Err(FramestepError::ClockViolation {
                    requested_ms: target_ms,
                    current_ms,
                });
            }
        }
        if self.token.is_none() {
            return Err(FramestepError::ClockState(
                "clock is not attached to a loaded page".into(),
            ));
        }

        self.state = ClockState::Advancing(target_ms);
        match self.advance_page(target_ms, floor, step, await_paint).await {
            Ok(tick) => {
                self.state = ClockState::Idle(target_ms);
                Ok(tick)
            }
            Err(err) => {
                self.state = ClockState::Closed;
                Err(err)
            }
        }
    }

    async fn advance_page(
        &mut self,
        target_ms: f64,
        floor: Option<f64>,
        step: Step,
        await_paint: bool,
    ) -> Result<ClockTick> {
        debug!("Advancing virtual clock to {}ms ({:?})", target_ms, step);
        let ack = self
            .scheduler
            .advance(AdvanceRequest {
                page_ms: target_ms - self.page_offset_ms,
                step,
                await_paint,
                expected_token: self.token.as_deref(),
            })
            .await?
            .ok_or_else(|| missing_runtime(target_ms))?;

        if ack.advanced {
            return Ok(ClockTick {
                instant_ms: target_ms,
                page_ms: ack.now,
                navigation: None,
            });
        }

        match self.policy {
            NavigationPolicy::Abort => {
                return Err(FramestepError::OverrideLost(format!(
                    "page navigated before {target_ms}ms and restarted its clock at {}ms",
                    ack.now
                )))
            }
            NavigationPolicy::Preserve => {
                warn!(
                    "Page navigated; fast-forwarding new document to {}ms",
                    target_ms
                );
            }
            NavigationPolicy::Reset => {
                self.page_offset_ms = floor.unwrap_or(0.0);
                warn!(
                    "Page navigated; restarting page clock from {}ms session time",
                    self.page_offset_ms
                );
            }
        }

        self.token = Some(ack.token);
        self.navigations += 1;
        let retry = self
            .scheduler
            .advance(AdvanceRequest {
                page_ms: target_ms - self.page_offset_ms,
                step,
                await_paint,
                expected_token: self.token.as_deref(),
            })
            .await?
            .ok_or_else(|| missing_runtime(target_ms))?;
        if !retry.advanced {
            return Err(FramestepError::OverrideLost(format!(
                "page navigated again while resynchronising at {target_ms}ms"
            )));
        }
        Ok(ClockTick {
            instant_ms: target_ms,
            page_ms: retry.now,
            navigation: Some(self.policy),
        })
    }

    /// Release the clock. Later advances fail.
    pub fn close(&mut self) {
        self.state = ClockState::Closed;
        self.token = None;
    }
}

fn closed_error() -> FramestepError {
    FramestepError::ClockState("virtual clock is closed".into())
}

fn missing_runtime(target_ms: f64) -> FramestepError {
    FramestepError::OverrideLost(format!(
        "virtual clock runtime missing from page at {target_ms}ms"
    ))
}
