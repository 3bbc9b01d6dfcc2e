//! 页面处理上下文
//!
//! 封装"我正在处理哪份文档的第几页"这一信息

use std::fmt::Display;

use crate::models::PageTask;

/// 页面处理上下文
#[derive(Debug, Clone)]
pub struct PageCtx {
    /// 文档实体 ID
    pub file_id: String,

    /// 源文件名，也是中间结果的键
    pub filename: String,

    /// 页号（从1开始）
    pub page: u32,
}

impl PageCtx {
    pub fn new(file_id: String, filename: String, page: u32) -> Self {
        Self {
            file_id,
            filename,
            page,
        }
    }
}

impl From<&PageTask> for PageCtx {
    fn from(task: &PageTask) -> Self {
        Self::new(task.file_id.clone(), task.filename.clone(), task.page)
    }
}

impl Display for PageCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[文档 {} 第{}页]", self.file_id, self.page)
    }
}
