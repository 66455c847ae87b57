use lib_telemetry::{ClientError, ClientHandle};

/// Connects and subscribes to every configured entity.
///
/// Subscriptions requested before the connection is up are queued by the
/// client and replayed once it connects, so a failed connect is not fatal
/// here unless the credentials were rejected.
pub async fn start(handle: ClientHandle, entities: Vec<String>) {
    match handle.connect().await {
        Ok(()) => log::info!("Upstream connection established."),
        Err(ClientError::AuthFailed) => {
            log::error!("Upstream rejected the credentials; restart with a valid token.");
            return;
        }
        Err(ClientError::ShutDown) => return,
        Err(e) => log::warn!("Initial connect failed: {}", e),
    }

    if entities.is_empty() {
        log::warn!("No entities configured; nothing to subscribe to.");
        return;
    }

    for entity_id in entities {
        match handle.subscribe(entity_id.as_str()).await {
            Ok(true) => {}
            Ok(false) => log::info!("Subscription to {} pending or declined.", entity_id),
            Err(ClientError::ShutDown) => return,
            Err(e) => log::warn!("Subscription to {} failed: {}", entity_id, e),
        }
    }
}
