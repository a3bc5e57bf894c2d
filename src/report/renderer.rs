use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use std::process::Stdio;

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_pdf(&self, html: &str) -> ApiResult<Vec<u8>>;
}

// Drives a headless chromium in print-to-pdf mode through the filesystem.
pub struct ChromiumRenderer {
    binary: String,
}

impl ChromiumRenderer {
    pub fn new(binary: String) -> Self {
        ChromiumRenderer { binary }
    }

    pub fn from_env() -> Self {
        let binary = std::env::var("CHROMIUM_BIN").unwrap_or_else(|_| "chromium".to_string());
        ChromiumRenderer::new(binary)
    }
}

#[async_trait]
impl DocumentRenderer for ChromiumRenderer {
    async fn render_pdf(&self, html: &str) -> ApiResult<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let html_path = workdir.path().join("report.html");
        let pdf_path = workdir.path().join("report.pdf");
        tokio::fs::write(&html_path, html).await?;

        let output = tokio::process::Command::new(&self.binary)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!("--print-to-pdf={}", pdf_path.display()))
            .arg(&html_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ApiError::Upstream(format!("chromium introuvable ({}): {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ApiError::Upstream(format!(
                "chromium exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let bytes = tokio::fs::read(&pdf_path).await.map_err(|e| {
            ApiError::Upstream(format!("chromium produced no pdf output: {}", e))
        })?;
        Ok(bytes)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    // Forces the html fallback path in tests.
    pub struct FailingRenderer;

    #[async_trait]
    impl DocumentRenderer for FailingRenderer {
        async fn render_pdf(&self, _html: &str) -> ApiResult<Vec<u8>> {
            Err(ApiError::Upstream("renderer unavailable".to_string()))
        }
    }
}
