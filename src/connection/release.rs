use super::{ConnectionFactory, SharedConnection};
use crate::core::Result;
use log::debug;

/// Release a connection at the end of a unit of work
///
/// With a factory, the release is delegated to
/// [`ConnectionFactory::release_connection`] and its error policy. Without
/// one, the connection is closed and close failures are logged.
pub async fn release_connection(
    connection: &SharedConnection,
    factory: Option<&dyn ConnectionFactory>,
    started: bool,
) -> Result<()> {
    match factory {
        Some(factory) => factory.release_connection(connection, started).await,
        None => {
            close_quietly(connection).await;
            Ok(())
        }
    }
}

pub async fn stop_quietly(connection: &SharedConnection) {
    if let Err(err) = connection.stop().await {
        debug!(
            "Could not stop messaging connection '{}': {}",
            connection.client_id(),
            err
        );
    }
}

pub async fn close_quietly(connection: &SharedConnection) {
    if let Err(err) = connection.close().await {
        debug!(
            "Could not close messaging connection '{}': {}",
            connection.client_id(),
            err
        );
    }
}
