pub mod drops;
pub mod settings;
pub mod stream;
