use anyhow::Result;
use clap::ArgMatches;

use student_registry::{EmailUpdate, MutationOutcome, NewStudent, PgStudentGateway, Student, StudentId};

fn required<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn plain_line(student: &Student) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        student.student_id,
        student.first_name,
        student.last_name,
        student.email,
        student.enrollment_date
    )
}

pub async fn handle_list(matches: &ArgMatches, gateway: &PgStudentGateway) -> Result<()> {
    let format = required(matches, "format");
    let students = gateway.list_all().await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&students)?),
        _ => {
            println!("--- All Students ---");
            for student in &students {
                println!("{}", plain_line(student));
            }
        }
    }

    Ok(())
}

pub async fn handle_add(matches: &ArgMatches, gateway: &PgStudentGateway) -> Result<()> {
    let student = NewStudent::new(
        required(matches, "first-name"),
        required(matches, "last-name"),
        required(matches, "email"),
        required(matches, "enrollment-date"),
    )?;

    gateway.insert(student).await?;
    println!("Student added successfully");
    Ok(())
}

pub async fn handle_update_email(matches: &ArgMatches, gateway: &PgStudentGateway) -> Result<()> {
    let student_id: StudentId = required(matches, "student-id").parse()?;
    let update = EmailUpdate::new(student_id, required(matches, "new-email"))?;

    match gateway.update_email(update).await? {
        MutationOutcome::Applied { .. } => {
            println!("Successfully updated email for student ID: {}", student_id)
        }
        MutationOutcome::NotFound => println!("No student found with ID: {}", student_id),
    }
    Ok(())
}

pub async fn handle_delete(matches: &ArgMatches, gateway: &PgStudentGateway) -> Result<()> {
    let student_id: StudentId = required(matches, "student-id").parse()?;

    match gateway.delete(student_id).await? {
        MutationOutcome::Applied { .. } => println!("Successfully deleted student ID: {}", student_id),
        MutationOutcome::NotFound => println!("No student found with ID: {}", student_id),
    }
    Ok(())
}
