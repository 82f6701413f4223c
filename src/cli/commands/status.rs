use anyhow::Result;
use clap::ArgMatches;

use student_registry::PgStudentGateway;

pub async fn handle_status(matches: &ArgMatches, gateway: &PgStudentGateway) -> Result<()> {
    let verbose = matches.get_flag("verbose");

    println!("🗄️  Connection Pool");

    if gateway.pool().health_check().await {
        println!("  ✅ Database reachable");
    } else {
        println!("  ❌ Could not lease a healthy connection");
        println!("    💡 Check DB_HOST, DB_PORT and credentials");
    }

    let stats = gateway.pool_stats();
    println!(
        "  📊 {} open ({} idle, {} active) of {} max",
        stats.size, stats.idle_connections, stats.active_connections, stats.max_size
    );

    if verbose {
        let config = gateway.pool().config();
        println!("    min_idle: {}", config.min_idle);
        println!("    connection_timeout: {}s", config.connection_timeout_secs);
        println!("    idle_timeout: {}s", config.idle_timeout_secs);
        println!("    max_lifetime: {}s", config.max_lifetime_secs);
        match gateway.deadline() {
            Some(deadline) => println!("    operation deadline: {}s", deadline.as_secs()),
            None => println!("    operation deadline: none"),
        }
        println!(
            "    leases: {}, releases: {}, failures: {}",
            stats.leases, stats.releases, stats.lease_failures
        );
    }

    Ok(())
}
