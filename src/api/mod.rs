pub mod presence;
pub mod report;
