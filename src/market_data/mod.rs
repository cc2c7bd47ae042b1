// Market data module entrypoint
pub mod dispatcher; // routes inbound events to handlers
pub mod normaliser; // converts strings -> ticks/lots
