/// Enum with the HTTP status codes this crate emits or caches.
///
/// Anything else can be produced through `Response::builder` with a raw
/// code and reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    //  1xx status codes
    Continue,                   // 100
    SwitchingProtocols,         // 101
    Processing,                 // 102
    //  2xx status codes
    Ok,                         // 200
    Created,                    // 201
    Accepted,                   // 202
    NoContent,                  // 204
    //  3xx status codes
    MovedPermanently,           // 301
    Found,                      // 302
    SeeOther,                   // 303
    NotModified,                // 304
    //  4xx status codes
    BadRequest,                 // 400
    Forbidden,                  // 403
    NotFound,                   // 404
    MethodNotAllowed,           // 405
    NotAcceptable,              // 406
    RequestTimeout,             // 408
    PreconditionFailed,         // 412
    PayloadTooLarge,            // 413
    UnsupportedMediaType,       // 415
    ImATeapot,                  // 418
    UpgradeRequired,            // 426
    //  5xx status codes
    InternalServerError,        // 500
    NotImplemented,             // 501
    ServiceUnavailable,         // 503
    HttpVersionNotSupported,    // 505
}

impl Status {
    pub fn code(&self) -> u16 {
        use self::Status::*;
        match *self {
            Continue => 100,
            SwitchingProtocols => 101,
            Processing => 102,
            Ok => 200,
            Created => 201,
            Accepted => 202,
            NoContent => 204,
            MovedPermanently => 301,
            Found => 302,
            SeeOther => 303,
            NotModified => 304,
            BadRequest => 400,
            Forbidden => 403,
            NotFound => 404,
            MethodNotAllowed => 405,
            NotAcceptable => 406,
            RequestTimeout => 408,
            PreconditionFailed => 412,
            PayloadTooLarge => 413,
            UnsupportedMediaType => 415,
            ImATeapot => 418,
            UpgradeRequired => 426,
            InternalServerError => 500,
            NotImplemented => 501,
            ServiceUnavailable => 503,
            HttpVersionNotSupported => 505,
        }
    }

    pub fn reason(&self) -> &'static str {
        use self::Status::*;
        match *self {
            Continue => "Continue",
            SwitchingProtocols => "Switching Protocols",
            Processing => "Processing",
            Ok => "OK",
            Created => "Created",
            Accepted => "Accepted",
            NoContent => "No Content",
            MovedPermanently => "Moved Permanently",
            Found => "Found",
            SeeOther => "See Other",
            NotModified => "Not Modified",
            BadRequest => "Bad Request",
            Forbidden => "Forbidden",
            NotFound => "Not Found",
            MethodNotAllowed => "Method Not Allowed",
            NotAcceptable => "Not Acceptable",
            RequestTimeout => "Request Timeout",
            PreconditionFailed => "Precondition Failed",
            PayloadTooLarge => "Payload Too Large",
            UnsupportedMediaType => "Unsupported Media Type",
            ImATeapot => "I'm a Teapot",
            UpgradeRequired => "Upgrade Required",
            InternalServerError => "Internal Server Error",
            NotImplemented => "Not Implemented",
            ServiceUnavailable => "Service Unavailable",
            HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// True for 1xx codes, which never end an exchange.
    pub fn is_informational(&self) -> bool {
        self.code() < 200
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn codes_match_reasons() {
        assert_eq!(Status::Ok.code(), 200);
        assert_eq!(Status::Ok.reason(), "OK");
        assert_eq!(Status::PayloadTooLarge.code(), 413);
        assert_eq!(Status::UpgradeRequired.code(), 426);
        assert!(Status::Continue.is_informational());
        assert!(!Status::NoContent.is_informational());
    }
}
