// CLI subcommands, one module per panel area

pub mod account;
pub mod keys;
