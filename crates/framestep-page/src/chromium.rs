use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::{
    cdp::{
        browser_protocol::{
            dom::Rgba,
            emulation::{SetDefaultBackgroundColorOverrideParams, SetDeviceMetricsOverrideParams},
            page::{
                AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
                CaptureScreenshotParams, Viewport as ClipViewport,
            },
        },
        js_protocol::runtime::EvaluateParams,
    },
    Browser, BrowserConfig as LaunchConfig, Page,
};
use framestep_types::{config::BrowserConfig, frame::ImageFormat, region::Viewport, Result};
use futures::StreamExt;
use serde_json::Value;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{page_error, PageDriver, PageScript, ScreenshotRequest};

/// One Chromium tab driven over the DevTools protocol.
pub struct ChromiumPage {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumPage {
    /// Launch a browser and open a blank tab sized to `viewport`.
    pub async fn launch(config: &BrowserConfig, viewport: Viewport) -> Result<Self> {
        let mut builder = LaunchConfig::builder().window_size(viewport.width, viewport.height);
        if !config.headless {
            builder = builder.with_head();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(executable) = &config.executable {
            builder = builder.chrome_executable(executable);
        }
        if !config.args.is_empty() {
            builder = builder.args(config.args.iter().map(String::as_str));
        }
        let launch = builder
            .build()
            .map_err(|err| page_error(format!("invalid browser configuration: {err}")))?;

        info!("Launching browser (headless: {})", config.headless);
        let (browser, mut handler) = Browser::launch(launch)
            .await
            .map_err(|err| page_error(format!("failed to launch browser: {err}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("Browser handler stopped: {err}");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| page_error(format!("failed to open page: {err}")))?;

        Ok(Self {
            page,
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler_task)),
        })
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn add_init_script(&self, script: &PageScript, args: Vec<Value>) -> Result<()> {
        debug!("Registering init script {}", script.name);
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                script.invocation(&args),
            ))
            .await
            .map_err(|err| page_error(format!("failed to register {}: {err}", script.name)))?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|err| page_error(format!("navigation to {url} failed: {err}")))?;
        Ok(())
    }

    async fn evaluate(&self, script: &PageScript, args: Vec<Value>) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(script.invocation(&args))
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|err| page_error(format!("invalid evaluate params: {err}")))?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|err| page_error(format!("{} failed: {err}", script.name)))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<Vec<u8>> {
        let format = match request.format {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        };
        let mut builder = CaptureScreenshotParams::builder()
            .format(format)
            .from_surface(true)
            .capture_beyond_viewport(true)
            .clip(ClipViewport {
                x: request.clip.x,
                y: request.clip.y,
                width: request.clip.width,
                height: request.clip.height,
                scale: 1.0,
            });
        if let (ImageFormat::Jpeg, Some(quality)) = (request.format, request.quality) {
            builder = builder.quality(quality as i64);
        }

        let resp = self
            .page
            .execute(builder.build())
            .await
            .map_err(|err| page_error(format!("screenshot failed: {err}")))?;
        let data_b64: &str = resp.data.as_ref();
        base64::engine::general_purpose::STANDARD
            .decode(data_b64.as_bytes())
            .map_err(|err| page_error(format!("screenshot base64 decode failed: {err}")))
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(viewport.width as i64)
            .height(viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|err| page_error(format!("invalid viewport: {err}")))?;
        self.page
            .execute(params)
            .await
            .map_err(|err| page_error(format!("failed to set viewport: {err}")))?;
        Ok(())
    }

    async fn set_transparent_background(&self) -> Result<()> {
        let params = SetDefaultBackgroundColorOverrideParams::builder()
            .color(Rgba {
                r: 0,
                g: 0,
                b: 0,
                a: Some(0.0),
            })
            .build();
        self.page
            .execute(params)
            .await
            .map_err(|err| page_error(format!("failed to clear background: {err}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        if let Err(err) = self.page.clone().close().await {
            warn!("Closing page failed: {err}");
        }
        if let Err(err) = browser.close().await {
            warn!("Closing browser failed: {err}");
        }
        let _ = browser.wait().await;
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }
        info!("Browser closed");
        Ok(())
    }
}
