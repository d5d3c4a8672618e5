/// Name of this project, as used in server headers and log spans.
#[inline(always)]
pub fn project_name() -> &'static str {
    "orderbench"
}

/// Identifier used for the `server` header of services we expose.
#[inline(always)]
pub fn network_service_identifier() -> &'static str {
    concat!("orderbench/", env!("CARGO_PKG_VERSION"))
}
