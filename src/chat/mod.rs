pub mod calls;
pub mod messages;
pub mod presence;
pub mod schedule;
pub mod status;
pub mod typing;
