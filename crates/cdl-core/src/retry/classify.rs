//! Classify HTTP status, curl errors and storage errors into failure classes.

use super::error::TransferError;
use super::policy::FailureClass;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> FailureClass {
    match code {
        429 | 503 => FailureClass::Throttled,
        408 | 500..=599 => FailureClass::Transient,
        // 401/403 (authorization revoked), 404/410 (gone) and every other status.
        _ => FailureClass::Permanent,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> FailureClass {
    if e.is_url_malformed() || e.is_unsupported_protocol() {
        return FailureClass::Permanent;
    }
    if e.is_write_error() {
        // Write errors are raised by our own sink; the sink reports the real cause.
        return FailureClass::LocalStorage;
    }
    FailureClass::Transient
}

/// Classify a transfer error into a failure class.
pub fn classify(e: &TransferError) -> FailureClass {
    match e {
        TransferError::Curl(ce) => classify_curl_error(ce),
        TransferError::Network(_) => FailureClass::Transient,
        TransferError::Http(code) => classify_http_status(*code),
        TransferError::PartialTransfer { .. } | TransferError::RangeMismatch { .. } => {
            FailureClass::Transient
        }
        TransferError::Storage(_) => FailureClass::LocalStorage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_and_503_throttled() {
        assert_eq!(classify_http_status(429), FailureClass::Throttled);
        assert_eq!(classify_http_status(503), FailureClass::Throttled);
    }

    #[test]
    fn http_5xx_and_408_transient() {
        assert_eq!(classify_http_status(500), FailureClass::Transient);
        assert_eq!(classify_http_status(502), FailureClass::Transient);
        assert_eq!(classify_http_status(408), FailureClass::Transient);
    }

    #[test]
    fn http_auth_and_gone_are_permanent() {
        for code in [401, 403, 404, 410, 400] {
            assert_eq!(classify_http_status(code), FailureClass::Permanent, "{code}");
        }
    }

    #[test]
    fn short_body_is_transient_and_disk_errors_are_local() {
        let partial = TransferError::PartialTransfer {
            expected: 10,
            received: 4,
        };
        assert_eq!(classify(&partial), FailureClass::Transient);
        let disk = TransferError::Storage(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        ));
        assert_eq!(classify(&disk), FailureClass::LocalStorage);
        assert_eq!(
            classify(&TransferError::Network("reset".into())),
            FailureClass::Transient
        );
    }
}
