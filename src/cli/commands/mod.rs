pub mod ping;
pub mod status;
pub mod students;
