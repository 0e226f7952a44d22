pub mod control;
pub mod init;
pub mod run;
pub mod utils;
