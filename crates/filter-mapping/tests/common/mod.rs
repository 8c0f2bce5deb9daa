//! Common test utilities: the sample database, its saved cards and a
//! recording query executor

#[allow(unused_imports)]
pub mod sample_data;
#[allow(unused_imports)]
pub mod executor;

#[allow(unused_imports)]
pub use sample_data::*;
#[allow(unused_imports)]
pub use executor::*;
