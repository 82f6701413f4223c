use clap::{Arg, ArgMatches, Command};
use dotenv::dotenv;
use std::process;
use student_registry::{logging, Config, ConnectionPool, StudentGateway};

mod cli;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    let matches = build_cli().get_matches();

    if let Err(e) = run_command(matches).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn build_cli() -> Command {
    Command::new("students")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Manage the students table through a pooled PostgreSQL connection")
        .arg_required_else_help(true)
        .subcommand(Command::new("ping").about("Verify that a connection can be leased"))
        .subcommand(
            Command::new("list")
                .about("List all students")
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .help("Output format")
                        .value_parser(["plain", "json"])
                        .default_value("plain"),
                ),
        )
        .subcommand(
            Command::new("add")
                .about("Add a student")
                .arg(Arg::new("first-name").help("First name").required(true).index(1))
                .arg(Arg::new("last-name").help("Last name").required(true).index(2))
                .arg(Arg::new("email").help("Email address (unique)").required(true).index(3))
                .arg(
                    Arg::new("enrollment-date")
                        .help("Enrollment date, YYYY-MM-DD")
                        .required(true)
                        .index(4),
                ),
        )
        .subcommand(
            Command::new("update-email")
                .about("Change a student's email")
                .arg(Arg::new("student-id").help("Student ID").required(true).index(1))
                .arg(Arg::new("new-email").help("New email address").required(true).index(2)),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a student")
                .arg(Arg::new("student-id").help("Student ID").required(true).index(1)),
        )
        .subcommand(
            Command::new("status")
                .about("Show connection pool health and statistics")
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .help("Show pool configuration")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .arg(Arg::new("db-host").long("db-host").help("Database host").global(true))
        .arg(
            Arg::new("db-port")
                .long("db-port")
                .help("Database port")
                .global(true)
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(Arg::new("db-name").long("db-name").help("Database name").global(true))
        .arg(Arg::new("db-user").long("db-user").help("Database user").global(true))
        .arg(Arg::new("db-password").long("db-password").help("Database password").global(true))
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Deadline in seconds for each operation")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

async fn run_command(matches: ArgMatches) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    cli::apply_overrides(&mut config, &matches);
    logging::init(&config.logging)?;

    let pool = ConnectionPool::postgres(
        config.database.to_connection_config(),
        config.pool.clone(),
    )
    .await?;
    let gateway = StudentGateway::new(pool);

    let result = match matches.subcommand() {
        Some(("ping", _)) => cli::commands::ping::handle_ping(&gateway).await,
        Some(("list", sub_matches)) => cli::commands::students::handle_list(sub_matches, &gateway).await,
        Some(("add", sub_matches)) => cli::commands::students::handle_add(sub_matches, &gateway).await,
        Some(("update-email", sub_matches)) => {
            cli::commands::students::handle_update_email(sub_matches, &gateway).await
        }
        Some(("delete", sub_matches)) => cli::commands::students::handle_delete(sub_matches, &gateway).await,
        Some(("status", sub_matches)) => cli::commands::status::handle_status(sub_matches, &gateway).await,
        _ => unreachable!("Command parsing should ensure we never reach this"),
    };

    // Close all connections so the process can exit
    gateway.close().await;

    result
}
