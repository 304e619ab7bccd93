pub mod health;
pub mod plugins;
