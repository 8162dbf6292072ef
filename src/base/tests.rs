use crate::base::neterror::{ErrorCategory, NetError};

#[test]
fn test_net_error_roundtrip() {
    // Standard Chromium error
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    // Custom error
    let custom = NetError::RedirectCycleDetected;
    let custom_code = custom.as_i32();
    assert_eq!(custom_code, -10000);
    let custom_converted = NetError::from(custom_code);
    assert!(matches!(custom_converted, NetError::RedirectCycleDetected));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
}

#[test]
fn test_collision_avoidance() {
    // Verify that we are not using the Blob error range (-900 to -906)
    // defined in Chromium's net_error_list.h
    let blob_range = -906..=-900;

    for err in [
        NetError::RedirectCycleDetected,
        NetError::ProxyAuthenticationFailed,
        NetError::ResponseTimedOut,
        NetError::InvalidState,
    ] {
        assert!(!blob_range.contains(&err.as_i32()));
    }
}

#[test]
fn test_categories() {
    assert_eq!(NetError::ConnectionReset.category(), ErrorCategory::Io);
    assert_eq!(NetError::ConnectionTimedOut.category(), ErrorCategory::Timeout);
    assert_eq!(NetError::ResponseTimedOut.category(), ErrorCategory::Timeout);
    assert_eq!(NetError::TooManyRedirects.category(), ErrorCategory::Fatal);
    assert_eq!(NetError::ProxyAuthenticationFailed.category(), ErrorCategory::Fatal);
    assert_eq!(NetError::InvalidResponse.category(), ErrorCategory::Processing);
    assert_eq!(NetError::InvalidState.category(), ErrorCategory::Request);

    assert!(NetError::RedirectCycleDetected.is_redirect_error());
    assert!(!NetError::ConnectionReset.is_redirect_error());
}
