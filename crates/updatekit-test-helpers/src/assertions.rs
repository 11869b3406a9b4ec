//! Assertion macros for status-style results.
//!
//! The macros only rely on the error type having a `kind()` method, so they
//! work with any crate's error enum that follows that convention.

/// Assert that a result is `Err` with the given kind.
///
/// # Example
///
/// ```rust
/// use updatekit_errors::{ErrorKind, UpdateError};
/// use updatekit_test_helpers::assert_error_kind;
///
/// let r: Result<(), UpdateError> = Err(UpdateError::not_found("x"));
/// assert_error_kind!(r, ErrorKind::NotFound);
/// ```
#[macro_export]
macro_rules! assert_error_kind {
    ($result:expr, $kind:expr $(,)?) => {
        match $result {
            Ok(_) => panic!(
                "assertion failed: expected Err of kind {:?}, got Ok",
                $kind
            ),
            Err(e) => {
                if e.kind() != $kind {
                    panic!(
                        "assertion failed: expected Err of kind {:?}, got {:?}: {}",
                        $kind,
                        e.kind(),
                        e
                    );
                }
            }
        }
    };
    ($result:expr, $kind:expr, $($arg:tt)+) => {
        match $result {
            Ok(_) => panic!(
                "assertion failed: expected Err of kind {:?}, got Ok: {}",
                $kind,
                format_args!($($arg)+)
            ),
            Err(e) => {
                if e.kind() != $kind {
                    panic!(
                        "assertion failed: expected Err of kind {:?}, got {:?}: {}: {}",
                        $kind,
                        e.kind(),
                        e,
                        format_args!($($arg)+)
                    );
                }
            }
        }
    };
}

/// Assert that a result is `Ok` and yield its value.
///
/// # Example
///
/// ```rust
/// use updatekit_test_helpers::assert_ok;
///
/// let r: Result<u8, String> = Ok(3);
/// let v = assert_ok!(r);
/// assert_eq!(v, 3);
/// ```
#[macro_export]
macro_rules! assert_ok {
    ($result:expr $(,)?) => {
        match $result {
            Ok(v) => v,
            Err(e) => panic!("assertion failed: expected Ok, got Err: {:?}", e),
        }
    };
}

/// Assert that a result is `Err` and yield the error.
///
/// # Example
///
/// ```rust
/// use updatekit_test_helpers::assert_err;
///
/// let r: Result<u8, String> = Err("no".into());
/// let e = assert_err!(r);
/// assert_eq!(e, "no");
/// ```
#[macro_export]
macro_rules! assert_err {
    ($result:expr $(,)?) => {
        match $result {
            Ok(v) => panic!("assertion failed: expected Err, got Ok: {:?}", v),
            Err(e) => e,
        }
    };
}
