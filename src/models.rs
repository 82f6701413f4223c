use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RegistryError, Result};

const MAX_EMAIL_LEN: usize = 255;
const MAX_NAME_LEN: usize = 100;

/// A row of the `students` table as returned by the engine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub student_id: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub enrollment_date: NaiveDate,
}

/// Server-assigned primary key of a student
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudentId(i32);

impl StudentId {
    pub fn new(id: i32) -> Result<Self> {
        if id <= 0 {
            return Err(RegistryError::Validation(format!(
                "student id must be positive, got {}",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i32 {
        self.0
    }

    pub(crate) fn as_i32(&self) -> &i32 {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StudentId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let id = s
            .trim()
            .parse::<i32>()
            .map_err(|e| RegistryError::Validation(format!("invalid student id '{}': {}", s, e)))?;
        Self::new(id)
    }
}

/// Fields for a new `students` row
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub enrollment_date: NaiveDate,
}

impl NewStudent {
    /// Build an insert request; `enrollment_date` is `YYYY-MM-DD`.
    pub fn new(first_name: &str, last_name: &str, email: &str, enrollment_date: &str) -> Result<Self> {
        let enrollment_date = NaiveDate::parse_from_str(enrollment_date, "%Y-%m-%d")
            .map_err(|e| {
                RegistryError::Validation(format!(
                    "enrollment date '{}' is not YYYY-MM-DD: {}",
                    enrollment_date, e
                ))
            })?;
        Self::with_date(first_name, last_name, email, enrollment_date)
    }

    pub fn with_date(
        first_name: &str,
        last_name: &str,
        email: &str,
        enrollment_date: NaiveDate,
    ) -> Result<Self> {
        let student = Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            enrollment_date,
        };
        student.validate()?;
        Ok(student)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("first name", &self.first_name)?;
        validate_name("last name", &self.last_name)?;
        validate_email(&self.email)
    }
}

/// Request to replace one student's email
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EmailUpdate {
    pub student_id: StudentId,
    pub new_email: String,
}

impl EmailUpdate {
    pub fn new(student_id: StudentId, new_email: &str) -> Result<Self> {
        let new_email = new_email.to_string();
        validate_email(&new_email)?;
        Ok(Self { student_id, new_email })
    }
}

/// Result of a mutation that targets a single row by id.
///
/// Both variants are successful outcomes; `NotFound` means no row matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied { rows: u64 },
    NotFound,
}

impl MutationOutcome {
    pub fn from_affected(rows: u64) -> Self {
        if rows > 0 {
            MutationOutcome::Applied { rows }
        } else {
            MutationOutcome::NotFound
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied { .. })
    }

    pub fn rows_affected(&self) -> u64 {
        match self {
            MutationOutcome::Applied { rows } => *rows,
            MutationOutcome::NotFound => 0,
        }
    }
}

// Values reach the engine exactly as given, so padding is refused rather
// than stripped.
fn reject_padding(field: &str, value: &str) -> Result<()> {
    if value.trim() != value {
        return Err(RegistryError::Validation(format!(
            "{} has leading or trailing whitespace",
            field
        )));
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::Validation(format!("{} cannot be empty", field)));
    }
    reject_padding(field, value)?;
    if value.chars().count() > MAX_NAME_LEN {
        return Err(RegistryError::Validation(format!(
            "{} exceeds {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(())
}

// Format checks stay loose; the engine owns uniqueness.
fn validate_email(email: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(RegistryError::Validation("email cannot be empty".to_string()));
    }
    reject_padding("email", email)?;
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(RegistryError::Validation(format!(
            "email exceeds {} characters",
            MAX_EMAIL_LEN
        )));
    }
    if email.chars().any(char::is_control) {
        return Err(RegistryError::Validation("email contains control characters".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_student_parses_date() {
        let student = NewStudent::new("Ada", "Lovelace", "ada@example.com", "2024-01-01").unwrap();
        assert_eq!(student.enrollment_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(student.first_name, "Ada");
    }

    #[test]
    fn test_padded_values_are_rejected_not_rewritten() {
        assert!(NewStudent::new("  Chris ", "Pham", "chris@example.com", "2023-09-03").is_err());
        assert!(NewStudent::new("Chris", "Pham", " chris@example.com ", "2023-09-03").is_err());
        assert!(NewStudent::new("Chris", "Pham", "chris@example.com", " 2023-09-03").is_err());
        assert!(EmailUpdate::new(StudentId::new(1).unwrap(), "chris@example.com\t").is_err());

        let student = NewStudent::new("Mary Jo", "Pham", "chris@example.com", "2023-09-03").unwrap();
        assert_eq!(student.first_name, "Mary Jo");
        assert_eq!(student.email, "chris@example.com");
    }

    #[test]
    fn test_new_student_rejects_bad_input() {
        assert!(NewStudent::new("", "Lovelace", "ada@example.com", "2024-01-01").is_err());
        assert!(NewStudent::new("Ada", "   ", "ada@example.com", "2024-01-01").is_err());
        assert!(NewStudent::new("Ada", "Lovelace", "", "2024-01-01").is_err());
        assert!(NewStudent::new("Ada", "Lovelace", "ada@example.com", "01/01/2024").is_err());
        assert!(NewStudent::new("Ada", "Lovelace", "ada@example.com", "2024-02-30").is_err());
    }

    #[test]
    fn test_sql_metacharacters_are_valid_email_values() {
        let update = EmailUpdate::new(StudentId::new(1).unwrap(), "x'); DROP TABLE students;--");
        assert!(update.is_ok());
    }

    #[test]
    fn test_student_id_must_be_positive() {
        assert!(StudentId::new(0).is_err());
        assert!(StudentId::new(-4).is_err());
        assert_eq!(StudentId::new(4).unwrap().get(), 4);
        assert_eq!("12".parse::<StudentId>().unwrap().get(), 12);
        assert!("abc".parse::<StudentId>().is_err());
    }

    #[test]
    fn test_mutation_outcome_from_affected() {
        assert_eq!(MutationOutcome::from_affected(0), MutationOutcome::NotFound);
        assert_eq!(MutationOutcome::from_affected(1), MutationOutcome::Applied { rows: 1 });
        assert!(MutationOutcome::from_affected(2).is_applied());
        assert_eq!(MutationOutcome::NotFound.rows_affected(), 0);
    }
}
