use std::path::PathBuf;

use anyhow::Result;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressIterator};
use log::{info, warn};
use regex::Regex;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::JoinHandle;
use tokio_tar::Archive;
use walkdir::WalkDir;

use crate::utils::{pb_style, pb_style_speed};

pub struct ImageData {
    pub path: String,
    pub data: Vec<u8>,
}

/// 在后台读取目录或 tar 归档中的图片
pub fn task_scan(
    path: PathBuf,
    pb: ProgressBar,
    re_suf: Regex,
) -> (JoinHandle<Result<()>>, Receiver<ImageData>) {
    let (tx, rx) = channel(num_cpus::get() * 4);
    let t = tokio::spawn(async move {
        if path.is_file() {
            scan_tar(path, tx, re_suf, pb).await
        } else {
            scan_directory(path, tx, re_suf, pb).await
        }
    });
    (t, rx)
}

async fn scan_directory(
    path: PathBuf,
    tx: Sender<ImageData>,
    re_suf: Regex,
    pb: ProgressBar,
) -> Result<()> {
    info!("开始扫描目录: {}", path.display());
    let pb2 = ProgressBar::no_length().with_style(pb_style_speed());
    let mut entries = WalkDir::new(path)
        .into_iter()
        .progress_with(pb2)
        .filter_map(|entry| {
            entry.ok().and_then(|entry| {
                let path = entry.path();
                if path.is_file() {
                    if let Some(ext) = path.extension() {
                        if re_suf.is_match(&ext.to_string_lossy()) {
                            return Some(path.to_string_lossy().to_string());
                        }
                    }
                }
                None
            })
        })
        .collect::<Vec<_>>();
    // 保证同一个目录每次扫描的输出顺序一致
    entries.sort();
    info!("扫描完成，共 {} 张图片", entries.len());

    pb.set_style(pb_style());
    pb.set_length(entries.len() as u64);

    futures::stream::iter(entries)
        .for_each_concurrent(32, |entry| {
            let tx = tx.clone();
            let pb = pb.clone();
            async move {
                match tokio::fs::read(&entry).await {
                    Ok(data) => {
                        let _ = tx.send(ImageData { path: entry, data }).await;
                    }
                    Err(e) => {
                        warn!("无法读取 {entry}: {e}");
                        pb.inc(1);
                    }
                }
            }
        })
        .await;

    Ok(())
}

async fn scan_tar(
    path: PathBuf,
    tx: Sender<ImageData>,
    re_suf: Regex,
    pb: ProgressBar,
) -> Result<()> {
    info!("开始读取归档: {}", path.display());
    let file = File::open(path).await?;
    let mut archive = Archive::new(file);
    let mut entries = archive.entries()?;

    pb.set_style(pb_style_speed());

    // NOTE: tar 的 entries 必须按顺序读取，不能乱序并发
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        let path = entry.path()?;
        // 跳过不符合条件的文件
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Some(ext) = path.extension() else {
            continue;
        };
        if !re_suf.is_match(&ext.to_string_lossy()) {
            continue;
        }

        let path = path.to_string_lossy().to_string();

        let mut data = Vec::with_capacity(entry.header().size()? as usize);
        entry.read_to_end(&mut data).await?;

        if tx.send(ImageData { path, data }).await.is_err() {
            break;
        }
    }
    Ok(())
}
