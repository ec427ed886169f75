use cegs_config::load_toml;
use rstest::rstest;

const BASE: &str = r#"
[scheduler]
tick_ms = 50
medium_every = 4
slow_every = 20
log_every = 200

[fusion]
max_ig = 0.0001
min_hp = 0.01

[[gases]]
gas = "CO2"
rise_rate_threshold = 0.05
shutoff_latency_ms = 1200
flow_scale = 40.0
"#;

#[test]
fn empty_config_uses_defaults_and_validates() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults must be valid");
    assert_eq!(cfg.scheduler.tick_ms, 50);
    assert_eq!(cfg.alerts.cooldown_ms, 30 * 60 * 1000);
    assert_eq!(cfg.bleed.establish_ms, 150_000);
    assert_eq!(cfg.process.wait_slice_ms, 35);
}

#[test]
fn accepts_base_config_and_finds_gas_case_insensitively() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    let co2 = cfg.gas("co2").expect("gas present");
    assert_eq!(co2.shutoff_latency_ms, 1200);
}

#[rstest]
#[case("[scheduler]\nslow_every = 10\nmedium_every = 4\n", "multiple of scheduler.medium_every")]
#[case("[scheduler]\nlog_every = 30\n", "multiple of scheduler.slow_every")]
#[case("[scheduler]\ntick_ms = 0\n", "tick_ms must be >= 1")]
#[case("[fusion]\nmax_ig = 0.1\nmin_hp = 0.01\n", "max_ig must be > 0 and < fusion.min_hp")]
#[case("[fusion]\nswitch_hysteresis = 1.5\n", "switch_hysteresis")]
#[case("[process]\nwait_slice_ms = 100\n", "wait_slice_ms must be in [1, 35]")]
#[case("[pressurize]\nwindow_tolerance = 0.0\n", "window_tolerance")]
#[case("[bleed]\nwell_below_factor = 0.5\n", "well_below_factor")]
#[case("[watchdog]\nflood_vm_max = 0.001\n", "flood_vm_max")]
fn rejects_invalid_sections(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "error `{err}` should mention `{needle}`"
    );
}

#[test]
fn rejects_gas_with_zero_flow_scale() {
    let toml = r#"
[[gases]]
gas = "He"
rise_rate_threshold = 0.1
shutoff_latency_ms = 900
flow_scale = 0.0
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("flow_scale=0 must be rejected");
    assert!(format!("{err}").contains("flow_scale must be > 0"));
}

#[test]
fn unknown_section_field_type_is_a_parse_error() {
    assert!(load_toml("[scheduler]\ntick_ms = \"fast\"\n").is_err());
}
