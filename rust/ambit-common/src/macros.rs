/// Fails the enclosing function with a usage error when `cond` does not hold.
///
/// - If `cond` evaluates to `true`, execution continues.
/// - Otherwise the enclosing function returns
///   `Err(Error::usage(operation, message))`.
///
/// The enclosing function *must* return `ambit_common::Result<_>` (or a result
/// whose error type converts from `ambit_common::Error`).
#[macro_export]
macro_rules! verify_usage {
    ($operation:expr, $cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::usage($operation, format!($($msg)+)).into());
        }
    };
}
