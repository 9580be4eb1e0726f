//! Generates atf-sh regression test scripts for command-line utilities by
//! probing every option documented in their manual pages.
pub mod annotations;
pub mod cli;
pub mod config;
pub mod exec;
pub mod fetch;
pub mod generate;
pub mod install;
pub mod license;
pub mod manpage;
pub mod orchestrate;
pub mod paths;
pub mod staging;
pub mod synth;
pub mod util;
