pub mod compile;
pub mod deploy;
pub mod inspect;
pub mod status;
