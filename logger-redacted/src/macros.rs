// Logging macros

/// Logs an error together with its message and short type name.
///
/// ```ignore
/// log_failure!(err, order_id = 42, "payment capture failed");
/// ```
#[macro_export]
macro_rules! log_failure {
    ($err:expr, $($arg:tt)+) => {{
        let err = &$err;
        $crate::tracing::error!(
            error.message = %err,
            error.type = $crate::short_type_name_of(err),
            $($arg)+
        )
    }};
}

/// Last path segment of a type name, without generic arguments.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

pub fn short_type_name_of<T: ?Sized>(_value: &T) -> &'static str {
    short_type_name::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ValueError;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<ValueError>(), "ValueError");
        assert_eq!(short_type_name::<std::io::Error>(), "Error");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
        assert_eq!(short_type_name_of(&ValueError), "ValueError");
    }
}
