use env_logger::{Builder, Env};

use crate::constants::LOG_ENV_VAR;

/// Initialise logging, mapping the `-v`/`-q` difference to a default level.
///
/// The [`LOG_ENV_VAR`] environment variable, if set, takes precedence.
pub fn init(verbosity_level: i8) {
    let env = Env::default().filter_or(LOG_ENV_VAR, default_filter(verbosity_level));

    Builder::from_env(env).format_timestamp_millis().init();
}

fn default_filter(verbosity_level: i8) -> &'static str {
    match verbosity_level {
        i8::MIN..=-2 => "off",
        -1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        3..=i8::MAX => "trace",
    }
}
