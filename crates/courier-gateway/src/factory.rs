//! Builds adapter instances from `[[adapters]]` entries.

use std::path::Path;
use std::sync::Arc;

use axum::Router;

use courier_channels::{Adapter, ChannelError, ChannelType};
use courier_core::{AdapterEntry, AdapterKind};
use courier_longpoll::PollingAdapter;
use courier_rpc::RpcAdapter;
use courier_socket::SocketAdapter;
use courier_webhook::WebhookAdapter;

pub struct Built {
    pub adapter: Arc<dyn Adapter>,
    /// Callback routes to mount, for webhook adapters.
    pub routes: Option<Router>,
}

pub fn build(entry: &AdapterEntry, state_dir: &Path) -> Result<Built, ChannelError> {
    let channel_type: ChannelType = entry.channel_type.parse()?;
    let id = entry.id.clone();
    let name = entry.display_name().to_string();
    let config = entry.config.clone();

    let built = match entry.kind {
        AdapterKind::Socket => Built {
            adapter: Arc::new(SocketAdapter::new(id, name, channel_type, config)?),
            routes: None,
        },
        AdapterKind::Webhook => {
            let adapter = WebhookAdapter::new(id, name, channel_type, config)?;
            let routes = adapter.router();
            Built {
                adapter: Arc::new(adapter),
                routes: Some(routes),
            }
        }
        AdapterKind::Polling => Built {
            adapter: Arc::new(PollingAdapter::new(
                id,
                name,
                channel_type,
                config,
                state_dir,
            )?),
            routes: None,
        },
        AdapterKind::Rpc => Built {
            adapter: Arc::new(RpcAdapter::new(id, name, channel_type, config)),
            routes: None,
        },
    };
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_channels::TransportStyle;
    use courier_core::AdapterConfig;

    fn entry(id: &str, kind: AdapterKind, channel_type: &str) -> AdapterEntry {
        AdapterEntry {
            id: id.into(),
            name: None,
            kind,
            channel_type: channel_type.into(),
            enabled: true,
            config: AdapterConfig::default(),
        }
    }

    #[test]
    fn each_kind_builds_its_transport() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            (AdapterKind::Socket, "discord", TransportStyle::Socket, false),
            (AdapterKind::Webhook, "wecom", TransportStyle::Webhook, true),
            (AdapterKind::Polling, "telegram", TransportStyle::Polling, false),
            (AdapterKind::Rpc, "signal", TransportStyle::Socket, false),
        ];

        for (kind, channel, transport, has_routes) in cases {
            let built = build(&entry(channel, kind, channel), dir.path()).unwrap();
            assert_eq!(built.adapter.id(), channel);
            assert_eq!(built.adapter.name(), channel);
            assert_eq!(built.adapter.channel_type().as_str(), channel);
            assert_eq!(built.adapter.capabilities().transport(), transport);
            assert_eq!(built.routes.is_some(), has_routes);
            assert!(!built.adapter.is_running());
        }
    }

    #[test]
    fn unknown_channel_type_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build(&entry("x", AdapterKind::Socket, "myspace"), dir.path())
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::ConfigError(_)));
    }

    #[test]
    fn display_name_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = entry("tg-main", AdapterKind::Polling, "telegram");
        e.name = Some("Support bot".into());
        let built = build(&e, dir.path()).unwrap();
        assert_eq!(built.adapter.name(), "Support bot");
    }
}
