pub mod cycle;
pub mod status;
