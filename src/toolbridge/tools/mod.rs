//! Built-in tool handlers
//!
//! - **weather**: current conditions from OpenWeather. Unavailable without an API key.
//! - **wikipedia**: article summary, with a search fallback for inexact titles.
//! - **time**: local system time.
//!
//! Both HTTP tools use a 10 second request timeout and accept a base URL override so they can
//! be pointed at a stub server.

pub mod clock;
pub mod weather;
pub mod wikipedia;

pub use clock::ClockTool;
pub use weather::WeatherTool;
pub use wikipedia::WikipediaTool;

use crate::resource_protocol::ResourceDescriptor;
use std::time::Duration;

/// Timeout applied to every upstream request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const USER_AGENT: &str = concat!("toolbridge/", env!("CARGO_PKG_VERSION"));

/// Static resources served next to the built-in tools.
pub fn builtin_resources() -> Vec<(ResourceDescriptor, String)> {
    vec![
        (
            ResourceDescriptor::new("resource://weather_info", "Basic weather data info")
                .with_mime_type("text/plain"),
            "This server provides weather data for demonstration purposes.".to_string(),
        ),
        (
            ResourceDescriptor::new("resource://server_info", "What this server offers")
                .with_mime_type("text/plain"),
            format!(
                "toolbridge {} tool server. Tools: weather (current conditions by city), \
                 wikipedia (encyclopedia summary by topic), time (local system time).",
                env!("CARGO_PKG_VERSION")
            ),
        ),
    ]
}
