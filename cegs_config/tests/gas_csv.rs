use std::fs::File;
use std::io::Write;

use cegs_config::{GasRow, load_gas_csv, load_toml};
use rstest::rstest;
use tempfile::tempdir;

fn write_csv(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gases.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

#[rstest]
fn loads_rows_with_exact_headers() {
    let (_dir, path) = write_csv(
        "gas,rise_rate_threshold,shutoff_latency_ms,flow_scale\nCO2,0.05,1200,40.0\nH2, 0.2, 800, 120\n",
    );
    let rows = load_gas_csv(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].gas, "H2");
    assert_eq!(rows[1].shutoff_latency_ms, 800);
    assert!((rows[1].flow_scale - 120.0).abs() < 1e-9);
}

#[rstest]
fn rejects_wrong_headers() {
    let (_dir, path) = write_csv("name,latency\nCO2,1200\n");
    let err = load_gas_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("gas CSV must have headers"));
}

#[rstest]
fn rejects_non_positive_threshold_with_row_number() {
    let (_dir, path) = write_csv(
        "gas,rise_rate_threshold,shutoff_latency_ms,flow_scale\nCO2,0.05,1200,40.0\nAr,-1,900,10\n",
    );
    let err = load_gas_csv(&path).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("row 3"), "{msg}");
    assert!(msg.contains("rise_rate_threshold"), "{msg}");
}

#[rstest]
fn rejects_empty_file() {
    let (_dir, path) = write_csv("gas,rise_rate_threshold,shutoff_latency_ms,flow_scale\n");
    assert!(load_gas_csv(&path).is_err());
}

#[rstest]
fn csv_rows_override_toml_entries() {
    let mut cfg = load_toml(
        r#"
[[gases]]
gas = "CO2"
rise_rate_threshold = 0.05
shutoff_latency_ms = 1200
flow_scale = 40.0

[[gases]]
gas = "O2"
rise_rate_threshold = 0.1
shutoff_latency_ms = 1000
flow_scale = 30.0
"#,
    )
    .unwrap();
    cfg.merge_gases(vec![GasRow {
        gas: "CO2".into(),
        rise_rate_threshold: 0.07,
        shutoff_latency_ms: 1500,
        flow_scale: 50.0,
    }]);
    assert_eq!(cfg.gases.len(), 2);
    assert_eq!(cfg.gas("CO2").unwrap().shutoff_latency_ms, 1500);
    assert_eq!(cfg.gas("O2").unwrap().shutoff_latency_ms, 1000);
}
