use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use ndarray::array;
use ndarray_npy::write_npy;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

const TOY_GMM: &str = r#"{
    "weights": [0.5, 0.5],
    "means": [[0.0, 0.0], [1.0, 1.0]],
    "covariances": [[1.0, 1.0], [1.0, 1.0]]
}"#;

/// 配置目录中放好 gmm_params.json
#[fixture]
fn conf_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    dir.child("gmm_params.json").write_str(TOY_GMM).unwrap();
    dir
}

#[rstest]
fn inspect_default_model(conf_dir: TempDir) -> Result<()> {
    cargo_run!("fvdedup", "-c", conf_dir.path(), "inspect")
        .success()
        .stdout(predicate::str::contains("components    : 2"))
        .stdout(predicate::str::contains("descriptor_len: 4"));
    Ok(())
}

#[rstest]
fn inspect_json(conf_dir: TempDir) -> Result<()> {
    let gmm = conf_dir.child("gmm_params.json");
    cargo_run!("fvdedup", "inspect", gmm.path(), "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"feature_dim\": 2"));
    Ok(())
}

#[rstest]
#[case::bad_json("{\"weights\": [1.0]")]
#[case::bad_weights(r#"{"weights": [0.9, 0.9], "means": [[0.0], [1.0]], "covariances": [[1.0], [1.0]]}"#)]
#[case::zero_variance(r#"{"weights": [1.0], "means": [[0.0]], "covariances": [[0.0]]}"#)]
fn inspect_rejects_invalid_model(#[case] text: &str) -> Result<()> {
    let dir = TempDir::new()?;
    let gmm = dir.child("broken.json");
    gmm.write_str(text)?;
    cargo_run!("fvdedup", "inspect", gmm.path())
        .failure()
        .stderr(predicate::str::contains("GMM 参数格式错误"));
    Ok(())
}

#[rstest]
fn inspect_expected_dim(conf_dir: TempDir) -> Result<()> {
    cargo_run!("fvdedup", "-c", conf_dir.path(), "inspect", "-d", "1280").failure();
    Ok(())
}

#[rstest]
fn encode_then_compare(conf_dir: TempDir) -> Result<()> {
    let near = conf_dir.child("near.npy");
    let far = conf_dir.child("far.npy");
    write_npy(near.path(), &array![0.0f32, 0.0])?;
    write_npy(far.path(), &array![5.0f32, 5.0])?;

    let fv_near = conf_dir.child("fv_near.npy");
    let fv_far = conf_dir.child("fv_far.npy");
    cargo_run!("fvdedup", "-c", conf_dir.path(), "encode", near.path(), "-o", fv_near.path())
        .success();
    cargo_run!("fvdedup", "-c", conf_dir.path(), "encode", far.path(), "-o", fv_far.path())
        .success();
    fv_near.assert(predicate::path::exists());

    cargo_run!("fvdedup", "-c", conf_dir.path(), "compare", fv_near.path(), fv_near.path())
        .success()
        .stdout(predicate::str::contains("is_duplicate: true"));
    cargo_run!("fvdedup", "-c", conf_dir.path(), "compare", fv_near.path(), fv_far.path())
        .success()
        .stdout(predicate::str::contains("is_duplicate: false"));
    Ok(())
}

#[rstest]
fn encode_prints_json(conf_dir: TempDir) -> Result<()> {
    let feature = conf_dir.child("feature.npy");
    write_npy(feature.path(), &array![0.0f32, 0.0])?;
    cargo_run!("fvdedup", "-c", conf_dir.path(), "encode", feature.path(), "--output-format", "json")
        .success()
        .stdout(predicate::str::starts_with("[-0.50"));
    Ok(())
}

#[rstest]
fn compare_length_mismatch() -> Result<()> {
    let dir = TempDir::new()?;
    let a = dir.child("a.npy");
    let b = dir.child("b.npy");
    write_npy(a.path(), &array![0.5f32, 0.5])?;
    write_npy(b.path(), &array![0.5f32, 0.5, 0.5])?;
    cargo_run!("fvdedup", "compare", a.path(), b.path())
        .failure()
        .stderr(predicate::str::contains("描述符长度不匹配"));
    Ok(())
}

#[rstest]
fn compare_threshold_and_json() -> Result<()> {
    let dir = TempDir::new()?;
    let a = dir.child("a.npy");
    let b = dir.child("b.npy");
    write_npy(a.path(), &array![0.5f32, 0.5])?;
    write_npy(b.path(), &array![0.5f32, -0.5])?;
    // 距离为 1.0
    cargo_run!("fvdedup", "compare", a.path(), b.path(), "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"is_duplicate\": true"));
    cargo_run!("fvdedup", "compare", a.path(), b.path(), "-t", "0.5")
        .success()
        .stdout(predicate::str::contains("is_duplicate: false"));
    cargo_run!("fvdedup", "compare", a.path(), b.path(), "--min-similarity", "0.6")
        .success()
        .stdout(predicate::str::contains("is_duplicate: false"));
    Ok(())
}

#[rstest]
fn scan_without_extractor_model(conf_dir: TempDir) -> Result<()> {
    let images = conf_dir.child("images");
    images.create_dir_all()?;
    images.child("a.jpg").write_binary(&[0xff, 0xd8])?;
    cargo_run!("fvdedup", "-c", conf_dir.path(), "scan", images.path())
        .failure()
        .stderr(predicate::str::contains("特征提取失败"));
    Ok(())
}

#[rstest]
#[case::negative("--timeout=-1")]
#[case::zero("--timeout=0")]
#[case::nan("--timeout=NaN")]
fn encode_rejects_invalid_timeout(conf_dir: TempDir, #[case] flag: &str) -> Result<()> {
    let feature = conf_dir.child("feature.npy");
    write_npy(feature.path(), &array![0.0f32, 0.0])?;
    cargo_run!("fvdedup", "-c", conf_dir.path(), "encode", feature.path(), flag)
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--timeout"));
    Ok(())
}
