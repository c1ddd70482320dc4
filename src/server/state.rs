use std::sync::Arc;

use crate::scan::Scanner;

/// 应用状态
pub struct AppState {
    /// 查重流水线，所有请求共用同一个工作线程
    pub scanner: Scanner,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(scanner: Scanner, token: String) -> Arc<Self> {
        Arc::new(AppState { scanner, token })
    }
}
