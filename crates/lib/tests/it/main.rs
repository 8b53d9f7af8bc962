/*! Integration tests for Guardsync.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - handler: Tests for each event handler against in-memory data APIs
 * - service: Tests for queue processing, retries, reconciliation cycles and
 *   the background loop of SyncService
 * - config: Tests for loading SyncConfig from disk
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("guardsync=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod config;
mod helpers;
mod service;
