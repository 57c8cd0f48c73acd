use assert_cmd::Command;
use ribodesign_test_data::TestFile;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("ribodesign").unwrap();
    cmd.arg("--help");
    cmd.assert().success();
}

#[test]
fn test_cli_rejects_missing_input() {
    let mut cmd = Command::cargo_bin("ribodesign").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_cli_rejects_both_inputs() {
    let (pdbfile, _tmp) = TestFile::rna_hairpin_01().create_temp().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("ribodesign").unwrap();

    cmd.arg("--pdb_filepath")
        .arg(&pdbfile)
        .arg("--directory_filepath")
        .arg(dir.path());

    cmd.assert().failure();
}

#[test]
fn test_cli_reports_missing_checkpoint() {
    let (pdbfile, _tmp) = TestFile::rna_hairpin_01().create_temp().unwrap();
    let empty_store = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("ribodesign").unwrap();

    cmd.env("RIBODESIGN_CHECKPOINT_DIR", empty_store.path())
        .arg("--pdb_filepath")
        .arg(&pdbfile)
        .arg("--n_samples")
        .arg("2");

    let assert = cmd.assert().failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr);
    assert!(stderr.contains("unsupported configuration"));
}
