pub mod health;
pub mod items;
pub mod media;
pub mod migration;
