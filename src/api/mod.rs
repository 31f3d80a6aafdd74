// API module
//
// HTTP driver over the blockchain core: submit transactions, mine, inspect
// and validate the chain

pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use routes::configure_routes;
