//! Smoke binary: drives two simulated clients against the in-memory store
//! and prints the reconciled transcript each of them ends up with. Useful
//! for eyeballing engine behavior without wiring up a real backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use banter_store::mem::InMemoryStore;
use banter_sync::{Draft, ProjectDirectory, ProjectSession, SyncConfig};
use banter_types::emoji::ReactionEmoji;
use banter_types::models::NewProject;
use banter_types::view::{ReconciledView, ReplyView, SessionPhase};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banter=info".into()),
        )
        .init();

    let config = SyncConfig::from_env();
    let store = Arc::new(InMemoryStore::new());

    let ana = store.add_profile("ana");
    let bob = store.add_profile("bob");

    let directory = ProjectDirectory::open(store.clone(), config.resubscribe_delay);
    let project_id = directory
        .create(NewProject {
            title: "banter demo".into(),
            created_by: ana.id,
        })
        .await?;
    info!(%project_id, "project created");

    let ana_session =
        ProjectSession::open(store.clone(), ana.clone(), project_id, config.clone());
    let bob_session =
        ProjectSession::open(store.clone(), bob.clone(), project_id, config.clone());

    wait_live(&ana_session).await?;
    wait_live(&bob_session).await?;

    if let Err(failure) = ana_session.send(Draft::text("morning all")).await {
        anyhow::bail!("send failed: {}", failure.error);
    }
    let first_id = wait_for_messages(&bob_session, 1).await?.messages[0].id;

    bob_session.set_reply_target(Some(first_id)).await;
    if let Err(failure) = bob_session.send(Draft::text("morning! shipping today?")).await {
        anyhow::bail!("send failed: {}", failure.error);
    }
    wait_for_messages(&ana_session, 2).await?;

    bob_session.react(first_id, ReactionEmoji::Fire).await?;
    let mut view_rx = ana_session.watch_view();
    view_rx
        .wait_for(|v| v.message(first_id).is_some_and(|m| !m.reactions.is_empty()))
        .await?;

    // Delete the quoted message so the reply renders as a tombstone.
    ana_session.delete(first_id).await?;
    let mut view_rx = bob_session.watch_view();
    view_rx.wait_for(|v| v.messages.len() == 1).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\n=== ana's transcript ===");
    print_transcript(&ana_session.view());
    println!("\n=== bob's transcript ===");
    print_transcript(&bob_session.view());

    ana_session.close().await;
    bob_session.close().await;
    directory.close().await;
    Ok(())
}

async fn wait_live(session: &ProjectSession) -> anyhow::Result<()> {
    let mut view = session.watch_view();
    view.wait_for(|v| v.phase == SessionPhase::Live).await?;
    Ok(())
}

async fn wait_for_messages(session: &ProjectSession, count: usize) -> anyhow::Result<ReconciledView> {
    let mut view = session.watch_view();
    let view = view
        .wait_for(|v| v.messages.len() >= count && v.messages.iter().all(|m| !m.pending))
        .await?;
    Ok(view.clone())
}

fn print_transcript(view: &ReconciledView) {
    for message in &view.messages {
        match &message.reply {
            Some(ReplyView::Quoted(snap)) => {
                println!(
                    "  > {}: {}",
                    snap.author_username,
                    snap.content.as_deref().unwrap_or("[image]")
                );
            }
            Some(ReplyView::Tombstone) => println!("  > [message deleted]"),
            None => {}
        }
        let body = message.content.as_deref().unwrap_or("[image]");
        let mut line = format!("{}: {}", message.author.username, body);
        for agg in &message.reactions {
            line.push_str(&format!("  [{} x{}]", agg.emoji, agg.count));
        }
        if message.pending {
            line.push_str("  (sending...)");
        }
        println!("{line}");
    }
}
