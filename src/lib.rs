pub mod config;
pub mod controller;
pub mod correlator;
pub mod errors;
pub mod ledger;
pub mod oracle;
pub mod sequence;
pub mod tracker;
