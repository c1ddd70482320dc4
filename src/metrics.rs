use std::sync::LazyLock;
use std::time::Duration;

use prometheus::*;

use crate::error::{FvError, Result};

static METRIC_ENCODE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "fv_encode_duration",
        "duration of the per-job feature extraction and encoding in seconds"
    )
    .unwrap()
});

static METRIC_JOB_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("fv_job_count", "count of the finished encode jobs", &["outcome"])
        .unwrap()
});

static METRIC_WORKER_SPAWN_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("fv_worker_spawn_count", "count of the spawned encode workers").unwrap()
});

static METRIC_SCAN_PAIRS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "fv_scan_pairs",
        "number of the compared pairs per scan",
        &["size"],
        exponential_buckets(1.0, 4.0, 10).unwrap()
    )
    .unwrap()
});

static METRIC_SCAN_DUPLICATES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("fv_scan_duplicates", "count of the reported duplicate pairs", &["size"])
        .unwrap()
});

pub fn observe_encode(duration: Duration) {
    METRIC_ENCODE_DURATION.observe(duration.as_secs_f64());
}

/// 按结果类型统计任务数
pub fn inc_job_outcome<T>(result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(FvError::Timeout { .. }) => "timeout",
        Err(FvError::WorkerFailure(_)) => "worker_failure",
        Err(_) => "error",
    };
    METRIC_JOB_COUNT.with_label_values(&[outcome]).inc();
}

pub fn inc_worker_spawn() {
    METRIC_WORKER_SPAWN_COUNT.inc();
}

/// 记录一次扫描的比较次数和重复对数
pub fn inc_scan(inputs: usize, pairs: usize, duplicates: usize) {
    let size = to_fixed_size(inputs);
    METRIC_SCAN_PAIRS.with_label_values(&[size]).observe(pairs as f64);
    METRIC_SCAN_DUPLICATES.with_label_values(&[size]).inc_by(duplicates as u64);
}

/// 将输入数量调整到几个固定值
fn to_fixed_size(inputs: usize) -> &'static str {
    if inputs <= 10 {
        "10"
    } else if inputs <= 100 {
        "100"
    } else if inputs <= 1000 {
        "1000"
    } else if inputs <= 10000 {
        "10000"
    } else {
        "10000+"
    }
}
