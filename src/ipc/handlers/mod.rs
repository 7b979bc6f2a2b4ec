pub mod core;
pub mod grades;
pub mod semesters;
pub mod setup;
pub mod students;
pub mod upload;
