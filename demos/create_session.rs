use std::sync::Arc;

use walletconnect_v1_sdk::{
    Connector, ConnectorOptions, EventKey, FileStore, InternalEvent, Lifecycle,
    message::Payload, types::Metadata,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Any WalletConnect v1 bridge works, this one is the public default
    let bridge = "https://bridge.walletconnect.org";

    // Keeps the session across runs, so a second run resumes without a new
    // QR code
    let store = Arc::new(FileStore::new(".walletconnect"));

    let connector = Connector::new(
        ConnectorOptions::bridge(bridge)
            .with_store(store)
            .with_client_meta(Metadata {
                name: "WalletConnect v1 Rust SDK".to_string(),
                description: "Demo dapp opening a session".to_string(),
                url: "https://github.com/zemse/walletconnect-sdk-rs".to_string(),
                icons: vec![],
            }),
    )?;

    let mut display_uri = connector.on(EventKey::Lifecycle(Lifecycle::DisplayUri));
    let mut connect = connector.on(EventKey::Lifecycle(Lifecycle::Connect));
    let mut disconnect = connector.on(EventKey::Lifecycle(Lifecycle::Disconnect));

    if connector.connected() {
        println!("resumed session with {}", connector.peer_id());
    } else {
        connector.create_session(Some(1))?;
        if let Some(Ok(Payload::Event(InternalEvent::DisplayUri(uri)))) = display_uri.recv().await {
            // paste this into a wallet or render it as a QR code
            println!("{uri}");
        }
        let connected = connect.recv().await;
        println!("connected: {connected:?}");
    }

    println!("accounts: {:?}", connector.accounts());
    println!("chain id: {}", connector.chain_id());

    tokio::select! {
        event = disconnect.recv() => println!("disconnected: {event:?}"),
        _ = tokio::signal::ctrl_c() => {
            connector.kill_session(None)?;
            println!("session killed");
        }
    }

    Ok(())
}
