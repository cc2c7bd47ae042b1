pub mod types;     // domain payloads, inbound events and outbound requests
pub mod validator; // order book invariants
