mod settings;

pub use settings::{CaptureSettings, Config, OracleKind, OracleSettings, OutputFormat, EXAMPLE_CONFIG};
