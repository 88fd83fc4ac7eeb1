pub mod cache;
pub mod compare;
pub mod optimize;
pub mod run;
