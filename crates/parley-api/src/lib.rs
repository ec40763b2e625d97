pub mod health;
pub mod participants;
pub mod state;
