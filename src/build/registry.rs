// Container registry session (login handshake)

use tracing::info;

use crate::context::EnvironmentContext;
use crate::error::{ReleaseError, Result};
use crate::exec::Executor;

/// Log the container CLI in to the context's registry.
///
/// Authentication failures are operator errors, so there is no retry.
pub(crate) async fn authenticate(context: &EnvironmentContext, executor: &dyn Executor) -> Result<()> {
    executor
        .registry_login(&context.registry)
        .await
        .map_err(|source| ReleaseError::Registry {
            registry: context.registry.clone(),
            source,
        })?;

    info!("Authenticated with registry {}", context.registry);
    Ok(())
}
