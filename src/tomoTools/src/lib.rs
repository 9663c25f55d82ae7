
pub mod logging;
pub mod config;
pub mod error;
pub mod tools;
pub mod comfile;

pub mod mdoc;
pub mod mrc;
pub mod naming;

pub mod movie;
pub mod micrograph;
pub mod tiltseries;
pub mod tomogram;
pub mod resolve;

pub mod align;
pub mod dose;
pub mod exclude;
pub mod ctfplotter;
pub mod reconstruct;
pub mod prepare;
pub mod export;

pub mod ctf;
pub mod deconv;

pub mod commands;
