mod common;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

use common::{text_data, write_file};

fn ntk() -> Command {
    let mut cmd = Command::cargo_bin("ntk").unwrap();
    cmd.env_remove("NTK_PASSWORD").env_remove("NTK_LOG");
    cmd
}

#[test]
fn test_cli_compress_info_decompress_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let data = text_data(300_000, 50);
    let input = write_file(work.path(), "data.log", &data);

    // 1. Compress with the default output name
    ntk()
        .arg("compress")
        .arg(&input)
        .args(["--level", "3", "--block-size", "64K"])
        .assert()
        .success()
        .stdout(predicate::str::contains("data.log").and(predicate::str::contains("Ratio")));
    let archive = work.path().join("data.log.ntk");
    assert!(archive.exists());

    // 2. Inspect as JSON
    let out = ntk().arg("info").arg(&archive).arg("--json").output()?;
    assert!(out.status.success());
    let meta: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(meta["original_size"], 300_000);
    assert_eq!(meta["compressed_size"], fs::metadata(&archive)?.len());
    assert_eq!(meta["encrypted"], false);
    assert_eq!(meta["block_count"], 5);

    // 3. Decompress into another directory
    let restore_dir = tempdir()?;
    let restored = restore_dir.path().join("restored.log");
    ntk().arg("decompress").arg(&archive).arg("-o").arg(&restored).assert().success();
    assert_eq!(fs::read(&restored)?, data);
    Ok(())
}

#[test]
fn test_cli_default_decompress_name() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    let dst = tempdir()?;
    let input = write_file(src.path(), "report.csv", b"a,b,c\n1,2,3\n");
    let archive = dst.path().join("r.ntk");
    ntk().arg("c").arg(&input).arg("-o").arg(&archive).args(["--level", "1"]).assert().success();

    ntk().arg("x").arg(&archive).assert().success();
    assert_eq!(fs::read(dst.path().join("report.csv"))?, b"a,b,c\n1,2,3\n");
    Ok(())
}

#[test]
fn test_cli_encrypted_roundtrip_and_wrong_password() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let data = text_data(100_000, 51);
    let input = write_file(work.path(), "secret.txt", &data);
    let archive = work.path().join("secret.ntk");

    ntk()
        .arg("compress")
        .arg(&input)
        .arg("-o")
        .arg(&archive)
        .args(["--level", "3", "--block-size", "64K", "-e", "--kdf", "pbkdf2", "--password", "hunter2"])
        .assert()
        .success();

    let info = ntk().arg("info").arg(&archive).output()?;
    assert!(String::from_utf8(info.stdout)?.contains("Encrypted:   yes"));

    let wrong = work.path().join("wrong.txt");
    ntk()
        .arg("decompress")
        .arg(&archive)
        .arg("-o")
        .arg(&wrong)
        .args(["--password", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("authentication"));
    assert!(!wrong.exists());

    let restored = work.path().join("restored.txt");
    ntk()
        .env("NTK_PASSWORD", "hunter2")
        .arg("decompress")
        .arg(&archive)
        .arg("-o")
        .arg(&restored)
        .assert()
        .success();
    assert_eq!(fs::read(&restored)?, data);
    Ok(())
}

#[test]
fn test_cli_rejects_bad_arguments() {
    let work = tempdir().unwrap();
    let input = write_file(work.path(), "in.bin", b"x");

    ntk().arg("compress").arg(&input).args(["--level", "30"]).assert().failure();
    ntk()
        .arg("compress")
        .arg(&input)
        .args(["--block-size", "100000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("validation"));
    ntk().arg("info").arg(&input).assert().failure().stderr(predicate::str::contains("format"));

    let output = work.path().join("in.bin.ntk");
    ntk()
        .arg("compress")
        .arg(&input)
        .args(["--password", "no encrypt flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("validation").and(predicate::str::contains("encryption is not enabled")));
    assert!(!output.exists());
}

#[test]
fn test_cli_hide_and_unhide() -> Result<(), Box<dyn std::error::Error>> {
    let work = tempdir()?;
    let data = text_data(20_000, 52);
    let input = write_file(work.path(), "msg.txt", &data);
    let archive = work.path().join("msg.ntk");
    ntk().arg("compress").arg(&input).arg("-o").arg(&archive).args(["--level", "9"]).assert().success();

    let carrier = work.path().join("carrier.png");
    image::RgbImage::from_fn(200, 200, |x, y| image::Rgb([x as u8, y as u8, (x ^ y) as u8])).save(&carrier)?;
    let stego = work.path().join("stego.png");
    ntk().arg("hide").arg(&archive).arg("--image").arg(&carrier).arg("-o").arg(&stego).assert().success();

    let recovered = work.path().join("recovered.ntk");
    ntk().arg("unhide").arg(&stego).arg("-o").arg(&recovered).assert().success();
    assert_eq!(fs::read(&recovered)?, fs::read(&archive)?);
    Ok(())
}
