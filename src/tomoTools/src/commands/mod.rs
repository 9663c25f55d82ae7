
pub mod prepare;
pub mod reconstruct;
pub mod deconv;
