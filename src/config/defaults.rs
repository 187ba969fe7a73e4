use std::path::PathBuf;

pub fn default_version() -> u32 {
    1
}

pub fn default_engine_binary() -> PathBuf {
    PathBuf::from("/usr/local/bin/agrr")
}

pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/agrr.sock")
}

pub fn default_timeout_sec() -> u64 {
    300 // 5 minutes
}

pub fn default_predict_timeout_sec() -> u64 {
    1800 // model inference can take half an hour
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_backoff_base_ms() -> u64 {
    200
}

pub fn default_true() -> bool {
    true
}

pub fn default_diagnostics_dir() -> PathBuf {
    PathBuf::from("tmp/debug")
}

pub fn default_store_path() -> PathBuf {
    PathBuf::from("plans.json")
}

pub fn default_catalog_path() -> PathBuf {
    PathBuf::from("crops.yaml")
}

pub fn default_objective() -> String {
    "maximize_profit".to_string()
}

pub fn default_continuous_cultivation_impact() -> f64 {
    0.7
}

pub fn default_channel_capacity() -> usize {
    256
}
