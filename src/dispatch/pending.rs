use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::{FvError, Result};
use crate::fisher::Descriptor;

pub type Completion = oneshot::Sender<Result<Descriptor>>;

struct PendingJob {
    completion: Completion,
    created_at: Instant,
    /// 任务被投递到的工作线程代数
    generation: u64,
}

/// 等待中的编码任务表，键为全局递增的任务 ID
///
/// 每个任务只会被移除一次：成功/失败响应、超时、工作线程故障三者之一，
/// 移除后才会通知调用者，所以不会出现重复完成。
#[derive(Default)]
pub struct PendingJobs {
    jobs: Mutex<HashMap<u64, PendingJob>>,
}

impl PendingJobs {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: u64, generation: u64, completion: Completion) {
        let job = PendingJob { completion, created_at: Instant::now(), generation };
        let old = self.lock().insert(id, job);
        debug_assert!(old.is_none(), "duplicate job id {id}");
    }

    /// 用结果完成任务，任务不存在（已超时或已失败）时返回 None
    pub fn settle(&self, id: u64, result: Result<Descriptor>) -> Option<Duration> {
        let job = self.lock().remove(&id)?;
        let elapsed = job.created_at.elapsed();
        // 调用者可能已经不再等待，忽略发送失败
        let _ = job.completion.send(result);
        Some(elapsed)
    }

    /// 移除任务但不通知，由超时路径使用
    pub fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// 以同一个错误完成某一代工作线程上的所有任务，返回完成的数量
    pub fn fail_generation(&self, generation: u64, err: &FvError) -> usize {
        let failed = {
            let mut jobs = self.lock();
            let ids = jobs
                .iter()
                .filter(|(_, job)| job.generation == generation)
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();
            ids.into_iter().filter_map(|id| jobs.remove(&id)).collect::<Vec<_>>()
        };
        let n = failed.len();
        for job in failed {
            let _ = job.completion.send(Err(err.clone()));
        }
        n
    }

    /// 以同一个错误完成所有任务
    pub fn fail_all(&self, err: &FvError) -> usize {
        let failed = self.lock().drain().collect::<Vec<_>>();
        let n = failed.len();
        for (_, job) in failed {
            let _ = job.completion.send(Err(err.clone()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_settle_once() {
        let pending = PendingJobs::default();
        let (tx, mut rx) = oneshot::channel();
        pending.insert(1, 1, tx);

        assert!(pending.settle(1, Ok(vec![1.0])).is_some());
        assert!(pending.settle(1, Ok(vec![2.0])).is_none());
        assert_eq!(rx.try_recv().unwrap().unwrap(), vec![1.0]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_remove_then_late_settle() {
        let pending = PendingJobs::default();
        let (tx, _rx) = oneshot::channel();
        pending.insert(7, 1, tx);

        assert!(pending.remove(7));
        assert!(!pending.remove(7));
        assert!(pending.settle(7, Ok(vec![])).is_none());
    }

    #[test]
    fn test_fail_generation() {
        let pending = PendingJobs::default();
        let mut receivers = vec![];
        for (id, generation) in [(1, 1), (2, 1), (3, 2)] {
            let (tx, rx) = oneshot::channel();
            pending.insert(id, generation, tx);
            receivers.push(rx);
        }

        let n = pending.fail_generation(1, &FvError::WorkerFailure("crash".into()));
        assert_eq!(n, 2);
        assert_eq!(pending.len(), 1);
        for rx in &mut receivers[..2] {
            assert_eq!(rx.try_recv().unwrap().unwrap_err().kind(), ErrorKind::WorkerFailure);
        }
        assert!(receivers[2].try_recv().is_err());

        assert_eq!(pending.fail_all(&FvError::WorkerFailure("shutdown".into())), 1);
        assert!(pending.is_empty());
    }
}
