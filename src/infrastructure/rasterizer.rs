//! PDF 页面光栅化
//!
//! 把源 PDF 的每一页转成一张可寻址的图片产物。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppResult, StageError};
use crate::infrastructure::object_store::{ArtifactLocation, ObjectStore};

/// 一页图片产物
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 页号，从 1 开始
    pub page: u32,
    pub location: ArtifactLocation,
}

/// 光栅化能力
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// 光栅化 `source`，图片写到 `output` 所指的 bucket / 前缀下，按页号升序返回
    async fn rasterize(
        &self,
        source: &ArtifactLocation,
        output: &ArtifactLocation,
        format: &str,
    ) -> AppResult<Vec<PageImage>>;
}

/// 图片格式对应的 pdftoppm 参数、文件扩展名和 MIME 类型
pub fn image_format(format: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match format.to_ascii_lowercase().as_str() {
        "jpeg" | "jpg" => Some(("-jpeg", "jpg", "image/jpeg")),
        "png" => Some(("-png", "png", "image/png")),
        _ => None,
    }
}

/// 基于 poppler `pdftoppm` 的光栅化实现
pub struct PdftoppmRasterizer {
    store: Arc<dyn ObjectStore>,
    binary: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(store: Arc<dyn ObjectStore>, binary: impl Into<String>, dpi: u32) -> Self {
        Self {
            store,
            binary: binary.into(),
            dpi,
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn rasterize(
        &self,
        source: &ArtifactLocation,
        output: &ArtifactLocation,
        format: &str,
    ) -> AppResult<Vec<PageImage>> {
        let fail = |reason: String| StageError::Rasterize {
            source_uri: source.to_string(),
            reason,
        };

        let (flag, ext, mime) =
            image_format(format).ok_or_else(|| fail(format!("不支持的图片格式 {}", format)))?;

        let pdf = self
            .store
            .get(source)
            .await?
            .ok_or_else(|| fail("源文件不存在".to_string()))?;

        let workdir = tempfile::tempdir()?;
        let input_path = workdir.path().join("input.pdf");
        tokio::fs::write(&input_path, &pdf).await?;

        let out_prefix = workdir.path().join("page");
        debug!("执行 {} -r {} {} {:?}", self.binary, self.dpi, flag, input_path);
        let result = tokio::process::Command::new(&self.binary)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(flag)
            .arg(&input_path)
            .arg(&out_prefix)
            .output()
            .await
            .map_err(|e| fail(format!("无法启动 {}: {}", self.binary, e)))?;

        if !result.status.success() {
            return Err(fail(format!(
                "{} 退出码 {:?}: {}",
                self.binary,
                result.status.code(),
                String::from_utf8_lossy(&result.stderr).trim()
            ))
            .into());
        }

        let mut rendered = Vec::new();
        let mut entries = tokio::fs::read_dir(workdir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(page) = parse_page_number(&name) {
                rendered.push((page, entry.path()));
            }
        }
        rendered.sort_by_key(|(page, _)| *page);

        if rendered.is_empty() {
            return Err(fail("没有生成任何页面".to_string()).into());
        }

        let prefix = output.key.trim_end_matches('/');
        let mut pages = Vec::with_capacity(rendered.len());
        for (page, path) in rendered {
            let location = ArtifactLocation::new(
                &output.bucket,
                format!("{}/page-{}.{}", prefix, page, ext),
            );
            let bytes = tokio::fs::read(&path).await?;
            self.store.put(&location, bytes, mime).await?;
            pages.push(PageImage { page, location });
        }

        info!("✓ {} 光栅化完成，共 {} 页", source, pages.len());
        Ok(pages)
    }
}

/// 解析 pdftoppm 输出文件名中的页号：`page-1.jpg`、`page-07.png`
fn parse_page_number(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_prefix("page-")?;
    let (digits, _) = stem.split_once('.')?;
    digits.parse().ok()
}
