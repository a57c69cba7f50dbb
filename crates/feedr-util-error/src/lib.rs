use std::{error, fmt};

/// Display an error followed by its whole `source()` chain on one line,
/// separated by `: `.
pub struct FmtCompactError<'e, E>(pub &'e E);

impl<E> fmt::Display for FmtCompactError<'_, E>
where
    E: error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut error = Some(self.0 as &dyn error::Error);

        while let Some(err) = error {
            f.write_fmt(format_args!("{err}"))?;
            error = err.source();
            if error.is_some() {
                f.write_str(": ")?;
            }
        }

        Ok(())
    }
}

pub trait FmtCompact {
    type Report: fmt::Display;
    fn fmt_compact(self) -> Self::Report;
}

impl<'e, E> FmtCompact for &'e E
where
    E: error::Error,
{
    type Report = FmtCompactError<'e, E>;

    fn fmt_compact(self) -> Self::Report {
        FmtCompactError(self)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use snafu::{ResultExt as _, Snafu};

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("store unavailable"))]
    struct Outer {
        source: io::Error,
    }

    fn failing() -> Result<u32, Outer> {
        Err::<u32, _>(io::Error::other("disk on fire")).context(OuterSnafu)
    }

    #[test]
    fn compact_error_joins_source_chain() {
        let err = failing().unwrap_err();
        assert_eq!(err.fmt_compact().to_string(), "store unavailable: disk on fire");
    }
}
