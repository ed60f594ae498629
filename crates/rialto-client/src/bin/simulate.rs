//! Two in-process users driving the full communication core: first
//! contact from a listing, notifications, a missed video call, then a
//! completed audio call. Useful for eyeballing the tracing output and as
//! a living end-to-end check.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use rialto_client::{
    CallState, CallType, ClientSession, CommsCore, CoreConfig, LogPush, ParticipantInfo,
    SimulatedMedia, SimulatedTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Rialto simulation v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Core and collaborators
    // -----------------------------------------------------------------------
    let config = CoreConfig::from_env();
    info!(?config, "Loaded configuration");

    let core = CommsCore::new(config);
    let media = SimulatedMedia::new();
    let transport = Arc::new(SimulatedTransport::new());

    let alice = ClientSession::sign_in(
        core.clone(),
        ParticipantInfo::new("alice", "Alice"),
        Arc::new(media.clone()),
        transport.clone(),
    )
    .await;
    let bob = ClientSession::sign_in(
        core.clone(),
        ParticipantInfo::new("bob", "Bob"),
        Arc::new(media.clone()),
        transport.clone(),
    )
    .await;

    let mut bob_notifications = bob.notifications(Arc::new(LogPush)).await;

    // -----------------------------------------------------------------------
    // 3. First contact from a listing
    // -----------------------------------------------------------------------
    let bob_info = ParticipantInfo::new("bob", "Bob");
    let alice_info = ParticipantInfo::new("alice", "Alice");

    alice
        .send_message_for_listing(&bob_info, "listing-7431", "Is the road bike still available?")
        .await?;

    let notification = tokio::time::timeout(Duration::from_secs(2), bob_notifications.next())
        .await?
        .expect("notification feed ended");
    info!(
        from = %notification.sender_name,
        preview = %notification.preview,
        "Bob was notified"
    );

    let thread_id = bob.thread_with(alice.user_id());
    bob.open_thread(&thread_id).await?;
    bob.send_message(&alice_info, "It is! Want to see it on video?")
        .await?;
    bob.leave_thread();

    info!(
        alice_online = alice.peer_online(bob.user_id()).await,
        alice_unread = alice.total_unread().await,
        "Messaging round trip done"
    );

    // -----------------------------------------------------------------------
    // 4. A call that nobody answers
    // -----------------------------------------------------------------------
    let missed = alice.start_call(bob.user_id(), CallType::Video).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let outcome = missed.hang_up().await?;
    info!(%outcome, "First call went unanswered");

    // -----------------------------------------------------------------------
    // 5. A call that connects
    // -----------------------------------------------------------------------
    let incoming = bob.incoming_calls(&thread_id).await;
    let caller_side = alice.start_call(bob.user_id(), CallType::Audio).await?;

    let offered = incoming
        .borrow()
        .clone()
        .expect("bob sees no incoming call");
    info!(
        from = %offered.caller,
        kind = %offered.call_type,
        "Bob accepts the incoming call"
    );
    let mut callee_side = bob.accept_call(&offered).await?;

    let mut caller_watch = caller_side.state_watch();
    tokio::time::timeout(
        Duration::from_secs(2),
        caller_watch.wait_for(|s| *s == CallState::Connected),
    )
    .await?
    .expect("state channel closed");
    info!("Call connected on both sides");

    caller_side.set_muted(true);
    caller_side.set_muted(false);

    caller_side.hang_up().await?;
    let outcome = callee_side.wait_terminal().await;
    info!(%outcome, live_media = media.live_handles(), "Call finished");

    // -----------------------------------------------------------------------
    // 6. Final state
    // -----------------------------------------------------------------------
    let threads = bob.threads().await;
    println!("{}", serde_json::to_string_pretty(&threads)?);
    println!(
        "bob unread: {}, alice unread: {}",
        bob.total_unread().await,
        alice.total_unread().await
    );

    Ok(())
}
