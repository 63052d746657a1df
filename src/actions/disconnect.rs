use crate::{config::Config, connector::ConnectorHandle, error::ConnectError};

/// Disconnect `connector`, or the current connector if `None`.
///
/// Another connection, if any, becomes the current one and is remembered as
/// the most recently used connector.
pub async fn disconnect(
    config: &Config,
    connector: Option<ConnectorHandle>,
) -> Result<(), ConnectError> {
    let connector = connector.or_else(|| {
        config
            .state()
            .current_connection()
            .map(|connection| connection.connector.clone())
    });
    let Some(connector) = connector else {
        return Ok(());
    };

    connector.disconnect().await?;
    config.unwatch_connection(&connector);
    config.set_state(|state| state.clone().without_connection(connector.uid()));

    let state = config.state();
    if let Some(connection) = state.current_connection() {
        super::remember_connector(config, &connection.connector).await;
    }

    Ok(())
}
