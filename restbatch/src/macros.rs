//! Macros for building [`crate::error::BatchError`] values.

/// Creates a [`crate::error::BatchError`] from an error kind and static description.
///
/// An optional third argument adds dynamic detail: use `detail = value` to move an owned
/// [`String`] in, or pass any [`ToString`] value directly. A trailing `source: err` attaches
/// the originating error.
#[macro_export]
macro_rules! batch_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::BatchError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::BatchError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::BatchError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::BatchError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::BatchError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::BatchError`] built by [`batch_error!`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::batch_error!($($arg)+))
    };
}

/// Returns early with a [`crate::error::BatchError`] unless `cond` holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::bail!($($arg)+);
        }
    };
}
