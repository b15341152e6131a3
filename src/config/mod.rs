pub mod opts;
pub mod settings;

pub use opts::Opts;
pub use settings::{
    Config, ConfigError, DestinationConfig, load_config, validate_destination, validate_hostname,
    write_template,
};
