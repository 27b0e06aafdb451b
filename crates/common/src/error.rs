/// Error types that can be built from a plain message string.
///
/// Crates implement this for their own error enum and then invoke
/// [`impl_context!`] inside their error module to get `.context()` and
/// `.with_context()` on `Result` and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` extension trait that turns any displayable
/// failure (or a missing `Option` value) into the given error type.
///
/// ```ignore
/// // in crates/config/src/error.rs
/// rainbow_common::impl_context!(Error);
/// ```
#[macro_export]
macro_rules! impl_context {
    ($error:ty) => {
        pub trait Context<T> {
            fn with_context<C, F>(self, f: F) -> std::result::Result<T, $error>
            where
                C: std::fmt::Display,
                F: FnOnce() -> C;

            fn context(self, context: &str) -> std::result::Result<T, $error>
            where
                Self: Sized,
            {
                self.with_context(|| context.to_owned())
            }
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn with_context<C, F>(self, f: F) -> std::result::Result<T, $error>
            where
                C: std::fmt::Display,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    <$error as $crate::FromMessage>::from_message(format!("{}: {source}", f()))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn with_context<C, F>(self, f: F) -> std::result::Result<T, $error>
            where
                C: std::fmt::Display,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <$error as $crate::FromMessage>::from_message(f().to_string()))
            }
        }
    };
}
