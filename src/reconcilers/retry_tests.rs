// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

#[cfg(test)]
mod tests {
    use super::super::{default_backoff, is_retryable_error};
    use std::time::Duration;

    /// Test that backoff configuration has expected values
    #[test]
    fn test_backoff_configuration() {
        let backoff = default_backoff();

        assert_eq!(
            backoff.initial_interval,
            Duration::from_millis(100),
            "Initial interval should be 100ms"
        );
        assert_eq!(
            backoff.max_interval,
            Duration::from_secs(30),
            "Max interval should be 30 seconds"
        );
        assert_eq!(
            backoff.max_elapsed_time,
            Some(Duration::from_secs(300)),
            "Max elapsed time should be 5 minutes"
        );

        #[allow(clippy::float_cmp)]
        {
            assert_eq!(
                backoff.multiplier, 2.0,
                "Multiplier should be 2.0 for exponential growth"
            );
            assert_eq!(
                backoff.randomization_factor, 0.1,
                "Randomization factor should be 0.1 (±10%)"
            );
        }
    }

    /// Test that HTTP 429 errors are retryable
    #[test]
    fn test_429_is_retryable() {
        let err = kube::Error::Api(kube::error::ErrorResponse {
            status: "Too Many Requests".to_string(),
            message: "Rate limit exceeded".to_string(),
            reason: "TooManyRequests".to_string(),
            code: 429,
        });

        assert!(
            is_retryable_error(&err),
            "HTTP 429 (rate limiting) should be retryable"
        );
    }

    /// Test that 5xx server errors are retryable
    #[test]
    fn test_5xx_is_retryable() {
        for code in [500, 503, 599] {
            let err = kube::Error::Api(kube::error::ErrorResponse {
                status: "Server Error".to_string(),
                message: "Server error".to_string(),
                reason: "ServerError".to_string(),
                code,
            });
            assert!(
                is_retryable_error(&err),
                "HTTP {code} should be retryable"
            );
        }
    }

    /// Test that 4xx client errors (except 429) are not retryable
    #[test]
    fn test_4xx_not_retryable() {
        for code in [400, 401, 404, 409] {
            let err = kube::Error::Api(kube::error::ErrorResponse {
                status: "Client Error".to_string(),
                message: "Client error".to_string(),
                reason: "ClientError".to_string(),
                code,
            });
            assert!(
                !is_retryable_error(&err),
                "HTTP {code} should not be retryable"
            );
        }
    }

    /// Test that service/network errors are retryable
    #[test]
    fn test_service_errors_retryable() {
        let service_error: Box<dyn std::error::Error + Send + Sync> = Box::new(
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection failed"),
        );

        let err = kube::Error::Service(service_error);

        assert!(
            is_retryable_error(&err),
            "Service/network errors should be retryable"
        );
    }

    /// Test backoff interval growth and capping
    #[test]
    fn test_backoff_growth_and_cap() {
        let mut backoff = default_backoff();

        let first = backoff.next_backoff().expect("first interval");
        assert!(
            first >= Duration::from_millis(90) && first <= Duration::from_millis(110),
            "first interval should be ~100ms (±10%), got {first:?}"
        );

        for _ in 0..20 {
            backoff.next_backoff();
        }
        assert_eq!(
            backoff.current_interval,
            Duration::from_secs(30),
            "interval should cap at the max after repeated growth"
        );
    }
}
