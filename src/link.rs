pub mod ethernet;
pub mod tx;
