// Order book engine entrypoint
pub mod types;     // events, sides, errors
pub mod level;     // price level arena + sorted ladder
pub mod book;      // single-symbol book with order index
pub mod registry;  // symbol -> book routing and serialization
