//! End-to-end tests against the public crate API.

mod mock_messaging;
mod mock_price_source;
mod session_flow;
mod settlement;
