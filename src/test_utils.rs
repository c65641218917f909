//! Helpers for tests that run several parties in one process.

use crate::channel_utils::sync_channel_by_cb::{create_crossbeam_channels, CrossbeamChannel};
use crate::channel_utils::Mesh;
use crate::ProtocolParams;
use std::sync::Once;

/// Installs a test-writer subscriber once per test binary. `RUST_LOG` overrides the level.
pub(crate) fn setup_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        use tracing::Level;
        use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let _ = tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(Level::WARN.into())
                    .from_env_lossy(),
            )
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Runs `f` for every party of a `nparties` deployment on its own thread, connected by
/// in-memory channels, and returns the results ordered by party index.
pub(crate) fn run_parties<T, F>(nparties: usize, set_size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(ProtocolParams, &mut Mesh<CrossbeamChannel>) -> T + Send + Sync + Clone + 'static,
{
    setup_logging();

    let handles = create_crossbeam_channels(nparties)
        .into_iter()
        .enumerate()
        .map(|(me, channels)| {
            let f = f.clone();
            std::thread::spawn(move || {
                let params = ProtocolParams::new(me, nparties, set_size, 2).unwrap();
                let mut mesh = Mesh::new(me, nparties, params.threads, channels).unwrap();
                f(params, &mut mesh)
            })
        })
        .collect::<Vec<_>>();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}
