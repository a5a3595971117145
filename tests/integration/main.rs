//! Integration tests for the TRADR trading loop.

mod mock_gateway;
mod scenarios;
