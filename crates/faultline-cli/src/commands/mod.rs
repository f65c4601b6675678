pub(crate) mod analyze;
pub(crate) mod config;
pub(crate) mod extract;
pub(crate) mod format;
pub(crate) mod repair;
pub(crate) mod run;
