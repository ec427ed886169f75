#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(mut cfg) = cegs_config::load_toml(data) {
        let _ = cfg.validate();
        let extra = cfg.gases.clone();
        cfg.merge_gases(extra);
        if let Some(first) = cfg.gases.first().map(|g| g.gas.clone()) {
            let _ = cfg.gas(&first);
        }
    }
});
