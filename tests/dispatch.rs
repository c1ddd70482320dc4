use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fvdedup::dispatch::*;
use fvdedup::error::{ErrorKind, FvError, Result};
use rstest::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 由测试手动控制响应的工作线程
struct ManualWorker {
    events: Option<mpsc::UnboundedSender<WorkerEvent>>,
    requests: Arc<Mutex<Vec<u64>>>,
    terminated: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
struct ManualFactory {
    workers: Arc<Mutex<Vec<ManualWorker>>>,
}

struct ManualLink {
    requests: Arc<Mutex<Vec<u64>>>,
    terminated: Arc<AtomicBool>,
}

impl WorkerFactory for ManualFactory {
    fn spawn(&self, events: mpsc::UnboundedSender<WorkerEvent>) -> Result<Box<dyn WorkerLink>> {
        let requests = Arc::new(Mutex::new(vec![]));
        let terminated = Arc::new(AtomicBool::new(false));
        self.workers.lock().unwrap().push(ManualWorker {
            events: Some(events),
            requests: requests.clone(),
            terminated: terminated.clone(),
        });
        Ok(Box::new(ManualLink { requests, terminated }))
    }
}

impl WorkerLink for ManualLink {
    fn post(&self, request: EncodeRequest) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(FvError::WorkerFailure("terminated".into()));
        }
        self.requests.lock().unwrap().push(request.id);
        Ok(())
    }

    fn terminate(self: Box<Self>) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

impl ManualFactory {
    fn spawn_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    fn requests(&self, worker: usize) -> Vec<u64> {
        self.workers.lock().unwrap()[worker].requests.lock().unwrap().clone()
    }

    fn is_terminated(&self, worker: usize) -> bool {
        self.workers.lock().unwrap()[worker].terminated.load(Ordering::SeqCst)
    }

    fn send(&self, worker: usize, event: WorkerEvent) {
        let workers = self.workers.lock().unwrap();
        workers[worker].events.as_ref().unwrap().send(event).unwrap();
    }

    fn respond(&self, worker: usize, id: u64, descriptor: Vec<f32>) {
        self.send(worker, WorkerEvent::Response { id, result: Ok(descriptor) });
    }

    /// 模拟工作线程退出但没有报告 Fatal
    fn drop_events(&self, worker: usize) {
        self.workers.lock().unwrap()[worker].events.take();
    }

    /// 等待工作线程收到 n 个任务
    async fn wait_requests(&self, worker: usize, n: usize) -> Vec<u64> {
        for _ in 0..1000 {
            if self.spawn_count() > worker {
                let requests = self.requests(worker);
                if requests.len() >= n {
                    return requests;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("worker {worker} did not receive {n} requests");
    }
}

#[fixture]
fn factory() -> ManualFactory {
    ManualFactory::default()
}

fn dispatcher(factory: &ManualFactory, timeout: Duration) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(DispatcherConfig { timeout }, factory.clone()))
}

fn submit(dispatcher: &Arc<Dispatcher>, value: f32) -> JoinHandle<Result<Vec<f32>>> {
    let dispatcher = dispatcher.clone();
    tokio::spawn(async move { dispatcher.submit(EncodeInput::Feature(vec![value])).await })
}

#[rstest]
#[tokio::test]
async fn worker_is_spawned_lazily(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    assert_eq!(factory.spawn_count(), 0);
    assert_eq!(d.worker_generation(), None);

    let job = submit(&d, 0.0);
    let ids = factory.wait_requests(0, 1).await;
    assert_eq!(factory.spawn_count(), 1);
    assert!(d.worker_generation().is_some());

    factory.respond(0, ids[0], vec![1.0]);
    assert_eq!(job.await.unwrap().unwrap(), vec![1.0]);
    assert_eq!(d.pending_count(), 0);
}

#[rstest]
#[tokio::test]
async fn responses_out_of_order(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    let jobs = (0..3).map(|i| submit(&d, i as f32)).collect::<Vec<_>>();

    let mut ids = factory.wait_requests(0, 3).await;
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), 3, "ids must be unique");

    // 按投递的逆序响应，结果内容用 ID 标记
    ids.reverse();
    for id in &ids {
        factory.respond(0, *id, vec![*id as f32]);
    }

    let mut received = vec![];
    for job in jobs {
        let descriptor = job.await.unwrap().unwrap();
        received.push(descriptor[0] as u64);
    }
    received.sort();
    assert_eq!(received, sorted);
    assert_eq!(d.pending_count(), 0);
}

#[rstest]
#[tokio::test]
async fn each_caller_gets_its_own_result(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    let first = submit(&d, 0.0);
    let first_id = factory.wait_requests(0, 1).await[0];
    let second = submit(&d, 0.0);
    let second_id = factory.wait_requests(0, 2).await[1];

    factory.respond(0, second_id, vec![2.0]);
    factory.respond(0, first_id, vec![1.0]);

    assert_eq!(first.await.unwrap().unwrap(), vec![1.0]);
    assert_eq!(second.await.unwrap().unwrap(), vec![2.0]);
}

#[rstest]
#[tokio::test]
async fn fatal_rejects_all_pending(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    let jobs = (0..3).map(|i| submit(&d, i as f32)).collect::<Vec<_>>();
    factory.wait_requests(0, 3).await;

    factory.send(0, WorkerEvent::Fatal("out of memory".into()));

    for job in jobs {
        let err = job.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkerFailure);
        assert!(err.to_string().contains("out of memory"));
    }
    assert_eq!(d.pending_count(), 0);
    assert!(factory.is_terminated(0));
    assert_eq!(d.worker_generation(), None);
}

#[rstest]
#[tokio::test]
async fn worker_is_recreated_after_failure(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    let job = submit(&d, 0.0);
    factory.wait_requests(0, 1).await;
    factory.send(0, WorkerEvent::Fatal("crash".into()));
    assert_eq!(job.await.unwrap().unwrap_err().kind(), ErrorKind::WorkerFailure);

    let job = submit(&d, 1.0);
    let ids = factory.wait_requests(1, 1).await;
    assert_eq!(factory.spawn_count(), 2);
    factory.respond(1, ids[0], vec![0.5]);
    assert_eq!(job.await.unwrap().unwrap(), vec![0.5]);
}

#[rstest]
#[tokio::test]
async fn worker_exit_without_fatal(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    let job = submit(&d, 0.0);
    factory.wait_requests(0, 1).await;

    factory.drop_events(0);
    assert_eq!(job.await.unwrap().unwrap_err().kind(), ErrorKind::WorkerFailure);
    assert_eq!(d.pending_count(), 0);
}

#[rstest]
#[tokio::test]
async fn timeout_then_late_response(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_millis(50));
    let job = submit(&d, 0.0);
    let id = factory.wait_requests(0, 1).await[0];

    let err = job.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(d.pending_count(), 0);

    // 迟到的响应被丢弃，工作线程继续可用
    factory.respond(0, id, vec![1.0]);
    let job = submit(&d, 1.0);
    let ids = factory.wait_requests(0, 2).await;
    factory.respond(0, ids[1], vec![2.0]);
    assert_eq!(job.await.unwrap().unwrap(), vec![2.0]);
    assert_eq!(factory.spawn_count(), 1);
}

#[rstest]
#[tokio::test]
async fn timeout_does_not_affect_other_jobs(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_millis(200));
    let slow = submit(&d, 0.0);
    let fast = submit(&d, 1.0);
    let ids = factory.wait_requests(0, 2).await;

    // 只响应其中一个
    let answered = ids[1];
    factory.respond(0, answered, vec![answered as f32]);

    let results = [slow.await.unwrap(), fast.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let timeout =
        results.iter().filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Timeout)).count();
    assert_eq!((ok, timeout), (1, 1));
}

#[rstest]
#[tokio::test]
async fn shutdown_rejects_pending(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    let job = submit(&d, 0.0);
    factory.wait_requests(0, 1).await;

    d.shutdown();
    assert_eq!(job.await.unwrap().unwrap_err().kind(), ErrorKind::WorkerFailure);
    assert!(factory.is_terminated(0));
}

#[rstest]
#[tokio::test]
async fn ids_increase_across_workers(factory: ManualFactory) {
    let d = dispatcher(&factory, Duration::from_secs(5));
    let job = submit(&d, 0.0);
    let first = factory.wait_requests(0, 1).await[0];
    factory.send(0, WorkerEvent::Fatal("crash".into()));
    let _ = job.await.unwrap();

    let job = submit(&d, 0.0);
    let second = factory.wait_requests(1, 1).await[0];
    assert!(second > first);
    factory.respond(1, second, vec![]);
    assert!(job.await.unwrap().is_ok());
}
