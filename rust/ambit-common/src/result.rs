pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn check_threads(core_threads: usize) -> Result<usize> {
        crate::verify_arg!(core_threads, core_threads > 0);
        Ok(core_threads)
    }

    #[test]
    fn test_verify_arg_passes() {
        assert_eq!(check_threads(4).unwrap(), 4);
    }

    #[test]
    fn test_verify_arg_reports_condition() {
        let err = check_threads(0).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidArgument { name, message } => {
                assert_eq!(name, "core_threads");
                assert_eq!(message, "core_threads > 0");
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
