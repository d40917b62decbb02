pub mod mqtt;
pub mod shadow;
