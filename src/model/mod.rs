pub mod presence;
pub mod role;
