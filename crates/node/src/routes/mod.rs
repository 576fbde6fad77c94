pub mod backends;
pub mod health;
