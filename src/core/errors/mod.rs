//! Error Classifier (§4.E): maps a raw transport/HTTP failure into a typed taxonomy
//! with an attached retry verdict, and computes the exponential backoff delay.

use std::time::Duration;

/// The phase a failure occurred in, used to disambiguate timeouts (§4.E detection column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Dial-phase timeout: the TCP/TLS handshake never completed.
    Connect,
    /// Read/write timeout after the connection was established.
    Response,
}

/// The raw observation the Forwarding Engine hands to the classifier. Each variant is a
/// semantic description of what happened, independent of the HTTP client crate's own
/// error type, so classification stays total and testable without a live socket.
#[derive(Debug, Clone)]
pub enum RawOutcome {
    /// The client disconnected or the request's cancellation token fired.
    ClientCancelled,
    Timeout(TimeoutPhase),
    /// Connection refused/reset/unreachable, or any other non-timeout transport error.
    Network(String),
    /// An HTTP response was received with this status and (possibly empty) body.
    Http { status: u16, body: String },
    /// The stream ended before a terminating event, after at least one byte was read.
    StreamInterrupted,
    /// The stream produced bytes that failed to parse as the expected event framing.
    StreamParseError(String),
    /// The full (non-streamed) response body failed to parse.
    BodyParseError(String),
    /// The Selector returned an empty candidate list.
    NoCandidate,
}

/// The typed error taxonomy (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unknown,
    Network,
    Eof,
    ConnectionTimeout,
    ResponseTimeout,
    Http,
    ServerError,
    Stream,
    Auth,
    RateLimit,
    Parsing,
    ClientCancel,
    NoHealthyEndpoints,
}

impl ErrorKind {
    /// Whether the Forwarding Engine may retry (possibly via failover) on this kind.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionTimeout
                | ErrorKind::Network
                | ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::Parsing
                | ErrorKind::NoHealthyEndpoints
        )
    }

    /// Whether it is safe, from a billing standpoint, to retry this error on another
    /// endpoint — false whenever the upstream may already have charged for a response
    /// whose bytes never reached the client (§4.E "billing-safe to retry" column).
    pub fn billing_safe_retry(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionTimeout
                | ErrorKind::Network
                | ErrorKind::RateLimit
                | ErrorKind::NoHealthyEndpoints
                | ErrorKind::Parsing
        )
    }

    /// Minimum retry delay mandated by the taxonomy regardless of the backoff curve
    /// (rate limits wait at least a minute; a missing candidate list retries at once).
    pub fn minimum_delay(self) -> Duration {
        match self {
            ErrorKind::RateLimit => Duration::from_secs(60),
            ErrorKind::NoHealthyEndpoints => Duration::ZERO,
            _ => Duration::ZERO,
        }
    }
}

/// Phrases that, in the absence of an operator-configured pattern, are still recognized
/// as rate-limit language inside an HTTP 400 body. Kept intentionally small: the
/// catch-all heuristic is opt-in (§9.6), this is just a fallback vocabulary once the
/// operator *has* opted in via an empty-but-enabled pattern is not assumed.
fn body_mentions_rate_limit(body: &str, pattern: &regex::Regex) -> bool {
    pattern.is_match(body)
}

/// Classify a raw outcome. Classification order follows §4.E: the first matching rule
/// wins, and every variant of [`RawOutcome`] maps to exactly one [`ErrorKind`] (§8
/// property 7: classification is total).
pub fn classify(raw: &RawOutcome, rate_limit_pattern: Option<&regex::Regex>) -> ErrorKind {
    match raw {
        RawOutcome::ClientCancelled => ErrorKind::ClientCancel,
        RawOutcome::StreamInterrupted => ErrorKind::Eof,
        RawOutcome::Timeout(TimeoutPhase::Connect) => ErrorKind::ConnectionTimeout,
        RawOutcome::Timeout(TimeoutPhase::Response) => ErrorKind::ResponseTimeout,
        RawOutcome::Network(_) => ErrorKind::Network,
        RawOutcome::Http { status, body } => classify_http(*status, body, rate_limit_pattern),
        RawOutcome::StreamParseError(_) => ErrorKind::Stream,
        RawOutcome::BodyParseError(_) => ErrorKind::Parsing,
        RawOutcome::NoCandidate => ErrorKind::NoHealthyEndpoints,
    }
}

fn classify_http(status: u16, body: &str, rate_limit_pattern: Option<&regex::Regex>) -> ErrorKind {
    if status == 429 {
        return ErrorKind::RateLimit;
    }
    if status == 400 {
        if let Some(pattern) = rate_limit_pattern {
            if body_mentions_rate_limit(body, pattern) {
                return ErrorKind::RateLimit;
            }
        }
        return ErrorKind::Http;
    }
    if status == 401 {
        return ErrorKind::Auth;
    }
    if (500..600).contains(&status) {
        return ErrorKind::ServerError;
    }
    if (400..500).contains(&status) {
        return ErrorKind::Http;
    }
    ErrorKind::Unknown
}

/// Exponential backoff with a hard ceiling: `base * factor^attempt`, clamped to `max`
/// (§4.E, defaults 1s / 2.0 / 30s).
pub fn backoff_delay(attempt: u32, base: Duration, factor: f64, max: Duration) -> Duration {
    let scaled = base.as_secs_f64() * factor.powi(attempt as i32);
    Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_total_over_every_variant() {
        let cases = [
            RawOutcome::ClientCancelled,
            RawOutcome::Timeout(TimeoutPhase::Connect),
            RawOutcome::Timeout(TimeoutPhase::Response),
            RawOutcome::Network("refused".into()),
            RawOutcome::Http { status: 429, body: String::new() },
            RawOutcome::Http { status: 400, body: String::new() },
            RawOutcome::Http { status: 401, body: String::new() },
            RawOutcome::Http { status: 404, body: String::new() },
            RawOutcome::Http { status: 500, body: String::new() },
            RawOutcome::Http { status: 200, body: String::new() },
            RawOutcome::StreamInterrupted,
            RawOutcome::StreamParseError("bad frame".into()),
            RawOutcome::BodyParseError("bad json".into()),
            RawOutcome::NoCandidate,
        ];
        // Every case classifies to exactly one kind without panicking.
        for case in &cases {
            let _ = classify(case, None);
        }
    }

    #[test]
    fn rate_limit_wins_over_plain_400_when_pattern_configured() {
        let pattern = regex::Regex::new("(?i)rate limit|quota").unwrap();
        let outcome = RawOutcome::Http {
            status: 400,
            body: "You have exceeded your rate limit".into(),
        };
        assert_eq!(classify(&outcome, Some(&pattern)), ErrorKind::RateLimit);
    }

    #[test]
    fn plain_400_without_pattern_classifies_as_http_not_rate_limit() {
        let outcome = RawOutcome::Http {
            status: 400,
            body: "missing required field".into(),
        };
        assert_eq!(classify(&outcome, None), ErrorKind::Http);
    }

    #[test]
    fn eof_is_not_retryable_and_not_billing_safe() {
        assert!(!ErrorKind::Eof.retryable());
        assert!(!ErrorKind::Eof.billing_safe_retry());
    }

    #[test]
    fn connection_timeout_is_retryable_and_billing_safe() {
        assert!(ErrorKind::ConnectionTimeout.retryable());
        assert!(ErrorKind::ConnectionTimeout.billing_safe_retry());
    }

    #[test]
    fn response_timeout_is_final() {
        assert!(!ErrorKind::ResponseTimeout.retryable());
        assert!(!ErrorKind::ResponseTimeout.billing_safe_retry());
    }

    #[test]
    fn backoff_is_clamped_to_max() {
        let d = backoff_delay(10, Duration::from_secs(1), 2.0, Duration::from_secs(30));
        assert_eq!(d, Duration::from_secs(30));
    }

    #[test]
    fn backoff_grows_exponentially_before_the_clamp() {
        let d0 = backoff_delay(0, Duration::from_secs(1), 2.0, Duration::from_secs(30));
        let d1 = backoff_delay(1, Duration::from_secs(1), 2.0, Duration::from_secs(30));
        let d2 = backoff_delay(2, Duration::from_secs(1), 2.0, Duration::from_secs(30));
        assert_eq!(d0, Duration::from_secs(1));
        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
    }

    #[test]
    fn rate_limit_has_one_minute_floor() {
        assert_eq!(ErrorKind::RateLimit.minimum_delay(), Duration::from_secs(60));
    }

    #[test]
    fn no_healthy_endpoints_retries_immediately() {
        assert_eq!(ErrorKind::NoHealthyEndpoints.minimum_delay(), Duration::ZERO);
        assert!(ErrorKind::NoHealthyEndpoints.retryable());
    }
}
