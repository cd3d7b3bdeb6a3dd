//! Clock override injection: the in-page runtime that replaces the page's
//! time primitives, and the scheduler that talks to it.

use std::sync::Arc;

use async_trait::async_trait;
use framestep_page::{page_error, PageDriver, PageScript};
use framestep_types::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Replaces `Date`, `performance.now`, animation frames and timers with
/// versions keyed off a virtual clock. Installed as an init script so it runs
/// before any page script, on every navigation.
pub const OVERRIDE_RUNTIME: PageScript = PageScript {
    name: "framestep.runtime",
    source: include_str!("runtime.js"),
};

pub const HANDSHAKE: PageScript = PageScript {
    name: "framestep.handshake",
    source: r#"function () {
  var fs = window.__framestep;
  if (!fs) {
    return null;
  }
  return { now: fs.now(), token: fs.token, advanced: false };
}"#,
};

/// Advance to `ms`, optionally pump one animation-frame cycle and wait for the
/// compositor. Refuses to advance when the page's token differs from
/// `expectedToken`, so the driver can decide what a navigation means.
pub const ADVANCE: PageScript = PageScript {
    name: "framestep.advance",
    source: r#"function (ms, pump, awaitPaint, expectedToken) {
  var fs = window.__framestep;
  if (!fs) {
    return null;
  }
  if (expectedToken !== null && fs.token !== expectedToken) {
    return { now: fs.now(), token: fs.token, advanced: false };
  }
  fs.processUntilTime(ms);
  if (pump) {
    fs.runAnimationFrames();
  }
  var ack = { now: fs.now(), token: fs.token, advanced: true };
  if (!awaitPaint) {
    return ack;
  }
  return fs.waitForPaint().then(function () {
    return ack;
  });
}"#,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideOptions {
    pub initial_time: f64,
    /// Wall-clock epoch for `Date`; the real load time when `None`.
    pub epoch: Option<f64>,
}

/// Reply from the in-page runtime after a handshake or an advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockAck {
    pub now: f64,
    pub token: String,
    pub advanced: bool,
}

/// How far one advance goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run due timers only.
    TimersOnly,
    /// Run due timers, then one animation-frame cycle.
    AnimationFrame,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvanceRequest<'a> {
    pub page_ms: f64,
    pub step: Step,
    pub await_paint: bool,
    pub expected_token: Option<&'a str>,
}

/// Scheduler seam between the clock driver and whatever executes page time.
///
/// `None` from `handshake` or `advance` means the override is not present in
/// the current document.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn install(&self, options: &OverrideOptions) -> Result<()>;
    async fn handshake(&self) -> Result<Option<ClockAck>>;
    async fn advance(&self, request: AdvanceRequest<'_>) -> Result<Option<ClockAck>>;
}

/// Scheduler backed by the in-page runtime, reached through a `PageDriver`.
pub struct InPageScheduler<P: PageDriver> {
    page: Arc<P>,
}

impl<P: PageDriver> InPageScheduler<P> {
    pub fn new(page: Arc<P>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl<P: PageDriver> Scheduler for InPageScheduler<P> {
    async fn install(&self, options: &OverrideOptions) -> Result<()> {
        let options = serde_json::to_value(options)
            .map_err(|err| page_error(format!("cannot encode override options: {err}")))?;
        self.page.add_init_script(&OVERRIDE_RUNTIME, vec![options]).await
    }

    async fn handshake(&self) -> Result<Option<ClockAck>> {
        let reply = self.page.evaluate(&HANDSHAKE, Vec::new()).await?;
        parse_ack(reply)
    }

    async fn advance(&self, request: AdvanceRequest<'_>) -> Result<Option<ClockAck>> {
        let args = vec![
            json!(request.page_ms),
            json!(request.step == Step::AnimationFrame),
            json!(request.await_paint),
            json!(request.expected_token),
        ];
        let reply = self.page.evaluate(&ADVANCE, args).await?;
        parse_ack(reply)
    }
}

fn parse_ack(reply: Value) -> Result<Option<ClockAck>> {
    if reply.is_null() {
        return Ok(None);
    }
    serde_json::from_value(reply)
        .map(Some)
        .map_err(|err| page_error(format!("malformed clock acknowledgement: {err}")))
}
