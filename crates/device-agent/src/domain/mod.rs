pub mod health;
pub mod inventory;
pub mod reconcile;
