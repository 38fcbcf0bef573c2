use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Default directive when RUST_LOG does not mention this crate
pub const DEFAULT_DIRECTIVE: &str = "ledger_bridge=info";

/// Installs the global fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = match DEFAULT_DIRECTIVE.parse() {
            Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
            Err(_) => EnvFilter::from_default_env(),
        };

        // A host application may already own the global subscriber
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    });
}
