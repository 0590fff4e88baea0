/// Formats an error together with its full `source()` chain.
///
/// Used as the `Debug` impl for every error enum in this crate so that
/// `anyhow`-style backtraced output survives even though we return plain
/// `thiserror` enums: `Display` stays a one-line summary, `Debug` walks the
/// chain for diagnostics.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
