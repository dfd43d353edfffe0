pub mod decoder;
pub mod fingerprint;
pub mod format;
pub mod logging;
pub mod meter;
pub mod models;
pub mod scanner;
pub mod track;
