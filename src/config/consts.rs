/// File name of the description inside a bundle directory.
pub const BUNDLE_FILE: &str = "bundle.json";
/// Log filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info";
