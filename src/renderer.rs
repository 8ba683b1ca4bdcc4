use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, BrowserConfig};
use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use url::Url;

/// The output of rendering one URL: the settled DOM (for title and link
/// extraction) and the printed PDF bytes.
pub struct RenderedPage {
    pub html: String,
    pub pdf: Vec<u8>,
}

/// Adapter over whatever turns a URL into a rendered page. The crawler only
/// sees this trait, so tests can substitute an in-memory site.
pub trait PageRenderer {
    fn render(&self, url: &Url) -> impl Future<Output = Result<RenderedPage>> + Send;
}

#[derive(Debug, Clone)]
pub struct PdfOptions {
    pub scale: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            scale: 0.75,
            margin_top: 0.0,
            margin_right: 0.0,
            margin_bottom: 0.0,
            margin_left: 0.0,
        }
    }
}

/// Renders pages with a single headless Chromium instance, one tab per page.
pub struct ChromiumRenderer {
    browser: Browser,
    handler_task: JoinHandle<()>,
    timeout: Duration,
    pdf_options: PdfOptions,
}

impl ChromiumRenderer {
    pub async fn launch(timeout: Duration) -> Result<Self> {
        let config = BrowserConfig::builder()
            .window_size(1920, 1080)
            .build()
            .map_err(|e| anyhow!("Failed to create browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(err) = h {
                    // Only log if it's not a common websocket deserialization error
                    let err_str = err.to_string();
                    if !err_str.contains("data did not match any variant")
                        && !err_str.contains("untagged enum Message")
                    {
                        error!("Browser handler error: {}", err);
                    } else {
                        debug!("Chrome protocol message ignored: {}", err);
                    }
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
            timeout,
            pdf_options: PdfOptions::default(),
        })
    }

    pub async fn close(mut self) {
        self.browser.close().await.ok();
        self.handler_task.abort();
    }

    async fn render_page(&self, url: &Url) -> Result<RenderedPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to create new page: {}", e))?;

        let result = self.render_on(&page, url).await;
        page.close().await.ok();
        result
    }

    async fn render_on(&self, page: &chromiumoxide::Page, url: &Url) -> Result<RenderedPage> {
        page.goto(url.as_str())
            .await
            .map_err(|e| anyhow!("Failed to navigate to {}: {}", url, e))?;

        page.wait_for_navigation()
            .await
            .map_err(|e| anyhow!("Failed to wait for navigation: {}", e))?;

        // Give client-side rendering a moment to settle
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let html = page
            .content()
            .await
            .map_err(|e| anyhow!("Failed to get page content: {}", e))?;

        let params = PrintToPdfParams {
            scale: Some(self.pdf_options.scale),
            margin_top: Some(self.pdf_options.margin_top),
            margin_right: Some(self.pdf_options.margin_right),
            margin_bottom: Some(self.pdf_options.margin_bottom),
            margin_left: Some(self.pdf_options.margin_left),
            ..Default::default()
        };

        let pdf = page
            .pdf(params)
            .await
            .map_err(|e| anyhow!("Failed to generate PDF for {}: {}", url, e))?;

        Ok(RenderedPage { html, pdf })
    }
}

impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &Url) -> Result<RenderedPage> {
        match tokio::time::timeout(self.timeout, self.render_page(url)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "Timed out after {:.0}s rendering {}",
                self.timeout.as_secs_f64(),
                url
            )),
        }
    }
}
