use std::path::Path;

use anyhow::{Context, Result};
use indicatif::ProgressStyle;
use ndarray::Array1;
use ndarray_npy::{read_npy, write_npy};
use regex::Regex;

use crate::fisher::Descriptor;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

pub fn pb_style_speed() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{elapsed_precise}] {spinner} {pos} ({per_sec}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// 根据逗号分隔的后缀名列表构建匹配扩展名的正则，忽略大小写
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let alternatives =
        suffix.split(',').map(str::trim).filter(|s| !s.is_empty()).map(regex::escape).collect::<Vec<_>>();
    let re = format!("(?i)^({})$", alternatives.join("|"));
    Ok(Regex::new(&re)?)
}

/// 路径是否为 .npy 文件
pub fn is_npy(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("npy"))
}

pub fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let arr: Array1<f32> =
        read_npy(path).with_context(|| format!("无法读取描述符: {}", path.display()))?;
    Ok(arr.to_vec())
}

pub fn write_descriptor(path: &Path, descriptor: &[f32]) -> Result<()> {
    write_npy(path, &Array1::from(descriptor.to_vec()))
        .with_context(|| format!("无法写入描述符: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_regex() {
        let re = suffix_regex("jpg, jpeg,png").unwrap();
        assert!(re.is_match("JPG"));
        assert!(re.is_match("jpeg"));
        assert!(!re.is_match("jpgx"));
        assert!(!re.is_match("webp"));
    }

    #[test]
    fn test_descriptor_npy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npy");
        assert!(is_npy(&path));
        write_descriptor(&path, &[0.5, -0.25]).unwrap();
        assert_eq!(read_descriptor(&path).unwrap(), vec![0.5, -0.25]);
    }
}
