//! 同步进度通知

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 不确定进度（扫描阶段）
pub const INDETERMINATE: f64 = -1.0;

/// 进度事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    /// 0..=1，或 -1 表示不确定
    pub fraction: f64,
    pub message: String,
    /// 单个文件失败时附带的错误
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 进度接收方，每个工作单元开始前同步调用一次，实现不能长时间阻塞
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64, message: &str);

    /// 单个文件失败，同步继续
    fn file_failed(&self, _path: &str, _error: &str) {}
}

impl<F> ProgressSink for F
where
    F: Fn(f64, &str) + Send + Sync,
{
    fn report(&self, fraction: f64, message: &str) {
        self(fraction, message)
    }
}

/// 不关心进度
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f64, _message: &str) {}
}

/// 把进度转发到通道，接收端关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct ChannelProgress(pub UnboundedSender<SyncProgress>);

impl ProgressSink for ChannelProgress {
    fn report(&self, fraction: f64, message: &str) {
        let _ = self.0.send(SyncProgress {
            fraction,
            message: message.to_string(),
            error: None,
        });
    }

    fn file_failed(&self, path: &str, error: &str) {
        let _ = self.0.send(SyncProgress {
            fraction: INDETERMINATE,
            message: path.to_string(),
            error: Some(error.to_string()),
        });
    }
}
