pub mod commands;

use clap::ArgMatches;
use student_registry::Config;

/// Command-line flags win over every other configuration source
pub fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(host) = matches.get_one::<String>("db-host") {
        config.database.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("db-port") {
        config.database.port = *port;
    }
    if let Some(name) = matches.get_one::<String>("db-name") {
        config.database.database = name.clone();
    }
    if let Some(user) = matches.get_one::<String>("db-user") {
        config.database.user = user.clone();
    }
    if let Some(password) = matches.get_one::<String>("db-password") {
        config.database.password = password.clone();
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.pool.operation_timeout_secs = Some(*timeout);
    }
}
