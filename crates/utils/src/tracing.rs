// Copyright 2023 Ulvetanna Inc.

/// Installs the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. Calling this more than once, or after
/// another subscriber has been installed, is a no-op.
pub fn init_tracing() {
	use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_thread_names(true))
		.try_init();
}

/// Installs a subscriber that writes through the test harness capture.
pub fn init_test_tracing() {
	use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_test_writer())
		.try_init();
}
