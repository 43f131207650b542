//! Failure injection points (feature: `failpoints`).
//!
//! Without the feature the macro expands to nothing. With it, a point fails
//! the enclosing function with [`ExecError::Failpoint`](crate::ExecError)
//! when its name is listed in `SLUICE_FAILPOINTS` (comma separated).

pub const FAILPOINTS_ENV: &str = "SLUICE_FAILPOINTS";

/// Whether the named point is armed in the environment.
#[cfg(feature = "failpoints")]
pub fn armed(name: &str) -> bool {
    std::env::var(FAILPOINTS_ENV)
        .map(|v| v.split(',').map(str::trim).any(|p| p == name))
        .unwrap_or(false)
}

#[cfg(feature = "failpoints")]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        let name = $name;
        if $crate::failpoints::armed(&name) {
            ::tracing::warn!(failpoint = %name, "failpoint triggered");
            return Err($crate::ExecError::Failpoint(name.to_string()));
        }
    }};
}

#[cfg(not(feature = "failpoints"))]
#[macro_export]
macro_rules! fail_point {
    ($name:expr) => {{
        let _ = || $name;
    }};
}
