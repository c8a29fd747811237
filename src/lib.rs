//! Assertion helpers for tests: value predicates plus a helper that drives
//! an actix-web server through one HTTP round trip and checks the response.

pub mod assertions;
pub mod configuration;
mod response;
mod server;
pub mod telemetry;

pub use assertions::{
    eql, has_length, has_type, includes, is_defined, is_not_null, is_null, is_undefined,
    matches, type_name, AssertionError, Subject,
};
pub use configuration::Settings;
pub use response::{
    assert_response, assert_response_with, Expectation, Matcher, ResponseError, TestRequest,
    TestResponse,
};
pub use server::{Ephemeral, Fixed, PortAllocator, Sequential, Serve, ServerHandle};
