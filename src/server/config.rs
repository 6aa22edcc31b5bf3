use std::sync::Arc;
use std::time::Duration;

use crate::enums::Version;
use crate::server::Config;

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            max_request_head_size: 401_216,
            max_request_body_buffer_size: 20 * 1024 * 1024,
            max_request_trailers_size: 8_000,
            max_error_responses: 3,
            min_http_version: Version::Http10,
            discard_rejected_informational: true,
            immediately_continue_expect_100: false,
            timeout_file_lock: Duration::from_secs(3),
            timeout_idle_connection: Duration::from_secs(180),
            implement_missing_options: true,
        }
    }

    /// Byte cap for a request head; exceeding it answers 413.
    pub fn max_request_head_size(&mut self, value: usize) -> &mut Self {
        self.max_request_head_size = value;
        self
    }

    /// Byte cap for buffered body accessors; exceeding it answers 413.
    pub fn max_request_body_buffer_size(&mut self, value: usize) -> &mut Self {
        self.max_request_body_buffer_size = value;
        self
    }

    /// Byte cap for a chunked trailer section; exceeding it answers 413.
    pub fn max_request_trailers_size(&mut self, value: usize) -> &mut Self {
        self.max_request_trailers_size = value;
        self
    }

    /// Consecutive 4xx/5xx responses tolerated before the connection closes.
    pub fn max_error_responses(&mut self, value: u32) -> &mut Self {
        self.max_error_responses = value;
        self
    }

    /// Requests below this version are answered 426 (Upgrade Required).
    pub fn min_http_version(&mut self, value: Version) -> &mut Self {
        self.min_http_version = value;
        self
    }

    /// Whether an interim response for an HTTP/1.0 peer is dropped (true)
    /// or surfaces as an error to the handler (false).
    pub fn discard_rejected_informational(&mut self, value: bool) -> &mut Self {
        self.discard_rejected_informational = value;
        self
    }

    /// Send `100 Continue` right after dispatch instead of on the first
    /// body access.
    pub fn immediately_continue_expect_100(&mut self, value: bool) -> &mut Self {
        self.immediately_continue_expect_100 = value;
        self
    }

    /// Patience for acquiring a file lock when serving file-backed bodies.
    ///
    /// # Panics
    ///
    /// Zero durations are rejected.
    pub fn timeout_file_lock(&mut self, value: Duration) -> &mut Self {
        assert!(value > Duration::new(0, 0),
            "timeout_file_lock must be positive");
        self.timeout_file_lock = value;
        self
    }

    /// Patience for any single socket read or write.
    ///
    /// # Panics
    ///
    /// Zero durations are rejected.
    pub fn timeout_idle_connection(&mut self, value: Duration) -> &mut Self {
        assert!(value > Duration::new(0, 0),
            "timeout_idle_connection must be positive");
        self.timeout_idle_connection = value;
        self
    }

    /// Answer 204 with an `Allow` header instead of 405 when OPTIONS is not
    /// implemented by the route.
    pub fn implement_missing_options(&mut self, value: bool) -> &mut Self {
        self.implement_missing_options = value;
        self
    }

    /// Create an Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;
    use super::Config;

    #[test]
    fn defaults() {
        let cfg = Config::new();
        assert_eq!(cfg.max_request_head_size, 401_216);
        assert_eq!(cfg.max_request_body_buffer_size, 20 * 1024 * 1024);
        assert_eq!(cfg.max_request_trailers_size, 8_000);
        assert_eq!(cfg.max_error_responses, 3);
        assert_eq!(cfg.timeout_idle_connection, Duration::from_secs(180));
        assert!(cfg.discard_rejected_informational);
        assert!(!cfg.immediately_continue_expect_100);
        assert!(cfg.implement_missing_options);
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn zero_idle_timeout_rejected() {
        Config::new().timeout_idle_connection(Duration::new(0, 0));
    }
}
