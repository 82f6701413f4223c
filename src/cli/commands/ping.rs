use anyhow::Result;

use student_registry::PgStudentGateway;

pub async fn handle_ping(gateway: &PgStudentGateway) -> Result<()> {
    gateway.verify_connectivity().await?;
    println!("Successfully connected to PostgreSQL!");
    Ok(())
}
