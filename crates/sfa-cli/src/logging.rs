use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directive used when neither `-v` nor `RUST_LOG` says otherwise
///
/// An attended terminal shows a spinner on stderr, so routine progress logs stay quiet there.
fn default_directive(attended: bool) -> &'static str {
    if attended {
        "warn"
    } else {
        "info"
    }
}

/// Log to stderr so stdout only carries results
///
/// `RUST_LOG` wins unless `verbose` forces debug output.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(default_directive(console::user_attended_stderr()))
        })
    };

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true), "warn");
        assert_eq!(default_directive(false), "info");
    }
}
